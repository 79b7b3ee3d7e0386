//! Activity processing
//!
//! Handles incoming ActivityPub activities.
//!
//! Each inbox call is processed once: it is either rejected before dispatch
//! (wrong media type, malformed body) or dispatched to exactly one handler.
//! Follow and Undo are fail-fast and leave no partial state behind; Like and
//! Announce are best effort.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::actor::{ACTIVITY_JSON, ActorResolver};
use super::delivery::{ActivityDelivery, builder};
use super::signature::{
    HeaderList, SignatureVerifier, VerificationRequest, key_id_matches_actor,
    parse_signature_header, signature_value, verify_digest,
};
use crate::data::{EntityId, FollowerStore, Reaction, ReactionKind, ReactionStore};
use crate::error::AppError;
use crate::metrics::{ACTIVITIES_RECEIVED, FOLLOWERS_TOTAL};

/// Accepted distance between a signed `Date` and now
const MAX_DATE_SKEW_SECONDS: i64 = 300;

/// ActivityPub Activity types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Follow,
    Undo,
    Accept,
    Create,
    Like,
    Announce,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "Follow",
            Self::Undo => "Undo",
            Self::Accept => "Accept",
            Self::Create => "Create",
            Self::Like => "Like",
            Self::Announce => "Announce",
        }
    }
}

impl FromStr for ActivityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Follow" => Ok(Self::Follow),
            "Undo" => Ok(Self::Undo),
            "Accept" => Ok(Self::Accept),
            "Create" => Ok(Self::Create),
            "Like" => Ok(Self::Like),
            "Announce" => Ok(Self::Announce),
            other => Err(AppError::MalformedActivity(format!(
                "Unsupported activity type: {}",
                other
            ))),
        }
    }
}

/// A validated inbound activity
#[derive(Debug, Clone, PartialEq)]
pub struct InboundActivity {
    pub kind: ActivityType,
    pub actor: Option<String>,
    pub object: Option<Value>,
    /// Activity as received
    pub raw: Value,
}

impl InboundActivity {
    /// Validate media type and body of an inbox request
    ///
    /// Only the media type of `content_type` is compared; parameters such as
    /// `charset` are ignored.
    ///
    /// # Errors
    /// - `UnsupportedMediaType` for any media type other than `application/activity+json`
    /// - `MalformedActivity` for non-JSON, non-object, untyped or unsupported activities
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, AppError> {
        let media_type = content_type
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .unwrap_or_default();
        if !media_type.eq_ignore_ascii_case(ACTIVITY_JSON) {
            return Err(AppError::UnsupportedMediaType(format!(
                "Expected {}, got {:?}",
                ACTIVITY_JSON,
                content_type.unwrap_or("")
            )));
        }

        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedActivity(format!("Invalid JSON: {}", e)))?;

        let object = raw
            .as_object()
            .ok_or_else(|| AppError::MalformedActivity("Activity is not an object".to_string()))?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::MalformedActivity("Missing activity type".to_string()))?
            .parse::<ActivityType>()?;

        Ok(Self {
            kind,
            actor: object
                .get("actor")
                .and_then(Value::as_str)
                .map(str::to_string),
            object: object.get("object").cloned(),
            raw,
        })
    }

    fn object_id(&self) -> Option<String> {
        match &self.object {
            Some(Value::String(id)) => Some(id.clone()),
            Some(object) => object.get("id").and_then(Value::as_str).map(str::to_string),
            None => None,
        }
    }
}

/// Raw inbox request as received over HTTP
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a str,
    /// Path including query
    pub path: &'a str,
    pub headers: &'a HeaderList,
    pub body: &'a [u8],
}

/// What an accepted inbox call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    Followed { actor: String, inserted: bool },
    Unfollowed { actor: String, removed: u64 },
    /// Reaction seen; `recorded` is false when storing it failed
    Reacted { kind: ReactionKind, recorded: bool },
    /// Undo of something other than a Follow
    Ignored,
}

/// Inbox state machine
pub struct ActivityRouter {
    followers: Arc<dyn FollowerStore>,
    reactions: Arc<dyn ReactionStore>,
    resolver: Arc<ActorResolver>,
    delivery: Arc<ActivityDelivery>,
    /// Local actor URI
    bot_id: String,
    /// Verify HTTP signatures of inbound requests
    verify_signatures: bool,
}

impl ActivityRouter {
    pub fn new(
        followers: Arc<dyn FollowerStore>,
        reactions: Arc<dyn ReactionStore>,
        resolver: Arc<ActorResolver>,
        delivery: Arc<ActivityDelivery>,
        bot_id: String,
    ) -> Self {
        Self {
            followers,
            reactions,
            resolver,
            delivery,
            bot_id,
            verify_signatures: false,
        }
    }

    pub fn with_signature_verification(mut self, enabled: bool) -> Self {
        self.verify_signatures = enabled;
        self
    }

    /// Process one inbox request
    ///
    /// # Errors
    /// Client errors for rejected requests; server errors when Follow or Undo
    /// processing fails.
    pub async fn receive(&self, request: InboundRequest<'_>) -> Result<InboxOutcome, AppError> {
        let activity =
            InboundActivity::parse(request.headers.get("content-type"), request.body)?;

        ACTIVITIES_RECEIVED
            .with_label_values(&[activity.kind.as_str()])
            .inc();

        if self.verify_signatures {
            self.authenticate(&request, &activity).await?;
        }

        self.route(activity).await
    }

    /// Dispatch a validated activity
    pub async fn route(&self, activity: InboundActivity) -> Result<InboxOutcome, AppError> {
        match activity.kind {
            ActivityType::Follow => self.handle_follow(activity).await,
            ActivityType::Undo => self.handle_undo(activity).await,
            ActivityType::Like => Ok(self.handle_reaction(ReactionKind::Like, activity).await),
            ActivityType::Announce => {
                Ok(self.handle_reaction(ReactionKind::Announce, activity).await)
            }
            ActivityType::Accept | ActivityType::Create => Err(AppError::MalformedActivity(
                format!("{} is not accepted at the inbox", activity.kind.as_str()),
            )),
        }
    }

    /// Handle Follow activity
    async fn handle_follow(&self, activity: InboundActivity) -> Result<InboxOutcome, AppError> {
        let actor_uri = activity
            .actor
            .clone()
            .ok_or_else(|| AppError::MalformedActivity("Missing actor in Follow".to_string()))?;

        // 1. Resolve actor for its inbox
        let actor = self.resolver.resolve(&actor_uri).await?;

        // 2. Add to followers
        let inserted = self.followers.add(&actor_uri).await?;

        // 3. Send Accept; roll back a fresh follower if that fails
        if let Err(e) = self.send_accept(&actor.inbox, activity.raw).await {
            if inserted {
                if let Err(rollback) = self.followers.remove(&actor_uri).await {
                    tracing::error!(
                        actor = %actor_uri,
                        error = %rollback,
                        "Failed to roll back follower after Accept failure"
                    );
                }
            }
            tracing::warn!(actor = %actor_uri, error = %e, "Failed to accept Follow");
            return Err(e);
        }

        if inserted {
            FOLLOWERS_TOTAL.inc();
        }
        tracing::info!(actor = %actor_uri, inserted, "Accepted Follow");

        Ok(InboxOutcome::Followed {
            actor: actor_uri,
            inserted,
        })
    }

    /// Handle Undo activity
    async fn handle_undo(&self, activity: InboundActivity) -> Result<InboxOutcome, AppError> {
        let Some(object) = activity.object.as_ref().filter(|object| {
            object.get("type").and_then(Value::as_str) == Some(ActivityType::Follow.as_str())
        }) else {
            tracing::debug!(actor = ?activity.actor, "Ignoring Undo of a non-Follow object");
            return Ok(InboxOutcome::Ignored);
        };

        let actor_uri = object
            .get("actor")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| activity.actor.clone())
            .ok_or_else(|| AppError::MalformedActivity("Missing actor in Undo".to_string()))?;

        let actor = self.resolver.resolve(&actor_uri).await?;
        let removed = self.followers.remove(&actor_uri).await?;

        // Restore a removed follower if the Accept fails. The restored row
        // sorts after followers added in the meantime.
        if let Err(e) = self.send_accept(&actor.inbox, activity.raw).await {
            if removed > 0 {
                if let Err(rollback) = self.followers.add(&actor_uri).await {
                    tracing::error!(
                        actor = %actor_uri,
                        error = %rollback,
                        "Failed to restore follower after Accept failure"
                    );
                    FOLLOWERS_TOTAL.sub(removed as i64);
                }
            }
            tracing::warn!(actor = %actor_uri, error = %e, "Failed to accept Undo");
            return Err(e);
        }

        if removed > 0 {
            FOLLOWERS_TOTAL.sub(removed as i64);
        }

        tracing::info!(actor = %actor_uri, removed, "Accepted Undo Follow");
        Ok(InboxOutcome::Unfollowed {
            actor: actor_uri,
            removed,
        })
    }

    /// Handle Like / Announce
    async fn handle_reaction(&self, kind: ReactionKind, activity: InboundActivity) -> InboxOutcome {
        let reaction = Reaction {
            kind,
            actor: activity.actor.clone(),
            object: activity.object_id(),
            activity: activity.raw,
            received_at: Utc::now(),
        };

        let recorded = match self.reactions.record_reaction(&reaction).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    actor = ?reaction.actor,
                    error = %e,
                    "Failed to record reaction"
                );
                false
            }
        };

        InboxOutcome::Reacted { kind, recorded }
    }

    async fn send_accept(&self, inbox: &str, object: Value) -> Result<(), AppError> {
        let id = format!("{}#accepts/{}", self.bot_id, EntityId::new().0);
        let accept = builder::accept(&id, &self.bot_id, object);
        self.delivery.deliver(inbox, &accept).await
    }

    /// Verify the HTTP signature of an inbox request
    ///
    /// The signing key is the `publicKeyPem` of the actor named by `keyId`,
    /// which must be the activity's actor.
    async fn authenticate(
        &self,
        request: &InboundRequest<'_>,
        activity: &InboundActivity,
    ) -> Result<(), AppError> {
        let signature = signature_value(request.headers).ok_or(AppError::InvalidSignature)?;
        let parsed = parse_signature_header(signature)?;

        if let Some(actor) = &activity.actor {
            if !key_id_matches_actor(&parsed.key_id, actor) {
                tracing::warn!(key_id = %parsed.key_id, actor = %actor, "Signature keyId actor mismatch");
                return Err(AppError::InvalidSignature);
            }
        }

        let digest = request
            .headers
            .get("digest")
            .ok_or_else(|| AppError::MissingRequiredHeader("digest".to_string()))?;
        if !verify_digest(digest, request.body) {
            tracing::warn!(key_id = %parsed.key_id, "Digest mismatch");
            return Err(AppError::InvalidSignature);
        }

        let date = request
            .headers
            .get("date")
            .ok_or_else(|| AppError::MissingRequiredHeader("date".to_string()))?;
        let date = DateTime::parse_from_rfc2822(date)
            .map_err(|_| AppError::Validation(format!("Invalid Date header: {}", date)))?;
        if (Utc::now().timestamp() - date.timestamp()).abs() > MAX_DATE_SKEW_SECONDS {
            tracing::warn!(key_id = %parsed.key_id, %date, "Date header outside accepted window");
            return Err(AppError::InvalidSignature);
        }

        let key_owner = parsed.key_id.split('#').next().unwrap_or(&parsed.key_id);
        let public_key_pem = self
            .resolver
            .resolve(key_owner)
            .await?
            .public_key_pem
            .ok_or_else(|| AppError::InvalidActor(format!("{} has no public key", key_owner)))?;

        let verified = SignatureVerifier::for_post().verify_parsed(
            &VerificationRequest {
                method: request.method,
                path: request.path,
                host: None,
                headers: request.headers,
            },
            &parsed,
            &public_key_pem,
        )?;

        if !verified {
            tracing::warn!(key_id = %parsed.key_id, "Invalid inbound signature");
            return Err(AppError::InvalidSignature);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_activity_json_with_parameters() {
        let body = br#"{"type":"Follow","actor":"https://remote.example/users/alice"}"#;
        let activity =
            InboundActivity::parse(Some("application/activity+json; charset=utf-8"), body)
                .unwrap();

        assert_eq!(activity.kind, ActivityType::Follow);
        assert_eq!(
            activity.actor.as_deref(),
            Some("https://remote.example/users/alice")
        );
        assert!(activity.object.is_none());
    }

    #[test]
    fn parse_rejects_other_media_types() {
        let body = br#"{"type":"Follow","actor":"https://remote.example/users/alice"}"#;
        for content_type in [Some("application/json"), Some("text/plain"), None] {
            assert!(matches!(
                InboundActivity::parse(content_type, body),
                Err(AppError::UnsupportedMediaType(_))
            ));
        }
    }

    #[test]
    fn parse_rejects_malformed_bodies() {
        for body in [
            &b"not json"[..],
            &br#"["Follow"]"#[..],
            &br#"{"actor":"https://remote.example/users/alice"}"#[..],
            &br#"{"type":"Delete"}"#[..],
            &br#"{"type":42}"#[..],
        ] {
            match InboundActivity::parse(Some(ACTIVITY_JSON), body) {
                Err(AppError::MalformedActivity(_)) => {}
                other => panic!("expected MalformedActivity, got: {other:?}"),
            }
        }
    }

    #[test]
    fn object_id_reads_string_or_embedded_id() {
        let like = InboundActivity::parse(
            Some(ACTIVITY_JSON),
            json!({"type": "Like", "object": "https://bot.example/notes/1"})
                .to_string()
                .as_bytes(),
        )
        .unwrap();
        assert_eq!(
            like.object_id().as_deref(),
            Some("https://bot.example/notes/1")
        );

        let announce = InboundActivity::parse(
            Some(ACTIVITY_JSON),
            json!({"type": "Announce", "object": {"id": "https://bot.example/notes/2"}})
                .to_string()
                .as_bytes(),
        )
        .unwrap();
        assert_eq!(
            announce.object_id().as_deref(),
            Some("https://bot.example/notes/2")
        );
    }

    #[test]
    fn activity_type_round_trips_names() {
        for name in ["Follow", "Undo", "Accept", "Create", "Like", "Announce"] {
            assert_eq!(name.parse::<ActivityType>().unwrap().as_str(), name);
        }
        assert!("Block".parse::<ActivityType>().is_err());
    }
}
