//! Outbox fan-out
//!
//! Delivers a note's Create activity to every follower. Each follower is
//! resolved and delivered to in its own task; a failure for one follower is
//! recorded in the report and never affects the others.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::actor::ActorResolver;
use super::delivery::{ActivityDelivery, DeliveryOutcome, DeliveryReport, DeliveryResult, builder};
use crate::data::{FollowerStore, Note};
use crate::error::AppError;
use crate::metrics::DELIVERIES_TOTAL;

/// Followers fetched per store query while draining
const FOLLOWER_PAGE_SIZE: u32 = 100;

/// Fans new notes out to followers
pub struct OutboxDispatcher {
    followers: Arc<dyn FollowerStore>,
    resolver: Arc<ActorResolver>,
    delivery: Arc<ActivityDelivery>,
    bot_id: String,
    base_url: String,
    max_concurrent: usize,
    delivery_timeout: Duration,
}

impl OutboxDispatcher {
    pub fn new(
        followers: Arc<dyn FollowerStore>,
        resolver: Arc<ActorResolver>,
        delivery: Arc<ActivityDelivery>,
        bot_id: String,
        base_url: String,
    ) -> Self {
        Self {
            followers,
            resolver,
            delivery,
            bot_id,
            base_url,
            max_concurrent: 10,
            delivery_timeout: Duration::from_secs(10),
        }
    }

    /// Bound concurrent deliveries
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Bound each resolve-and-deliver attempt
    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    /// Deliver `note` to all current followers
    ///
    /// Never fails: every per-follower error, including a timeout, ends up as
    /// a `Failed` entry. Results follow follower insertion order. If reading
    /// followers fails part way, the followers read so far are still served.
    pub async fn publish(&self, note: &Note) -> DeliveryReport {
        let activity = Arc::new(builder::create(note, &self.base_url, &self.bot_id));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let mut tasks = Vec::new();
        let mut followers = self.followers.pages(FOLLOWER_PAGE_SIZE);

        while let Some(follower) = followers.next().await {
            let follower = match follower {
                Ok(follower) => follower,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read followers; fan-out truncated");
                    break;
                }
            };

            let semaphore = semaphore.clone();
            let resolver = self.resolver.clone();
            let delivery = self.delivery.clone();
            let activity = activity.clone();
            let delivery_timeout = self.delivery_timeout;
            let actor = follower.actor.clone();

            let task = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| AppError::Internal(e.into()))?;

                match tokio::time::timeout(
                    delivery_timeout,
                    deliver_to_follower(&resolver, &delivery, &actor, &activity),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Network(format!(
                        "Delivery to {} timed out after {:?}",
                        actor, delivery_timeout
                    ))),
                }
            });

            tasks.push((follower.actor, task));
        }
        drop(followers);

        // Collect results
        let mut report = DeliveryReport::default();
        for (actor, task) in tasks {
            let outcome = match task.await {
                Ok(Ok(())) => DeliveryOutcome::Delivered,
                Ok(Err(e)) => {
                    self.resolver.invalidate(&actor).await;
                    DeliveryOutcome::Failed(e.to_string())
                }
                Err(e) => DeliveryOutcome::Failed(format!("Delivery task failed: {}", e)),
            };

            match &outcome {
                DeliveryOutcome::Delivered => {
                    DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
                }
                DeliveryOutcome::Failed(reason) => {
                    DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
                    tracing::warn!(actor = %actor, reason = %reason, "Delivery failed");
                }
            }

            report.results.push(DeliveryResult { actor, outcome });
        }

        tracing::info!(
            note = %note.id,
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            "Fan-out complete"
        );

        report
    }
}

async fn deliver_to_follower(
    resolver: &ActorResolver,
    delivery: &ActivityDelivery,
    actor: &str,
    activity: &Value,
) -> Result<(), AppError> {
    let actor = resolver.resolve(actor).await?;
    delivery.deliver(&actor.inbox, activity).await
}
