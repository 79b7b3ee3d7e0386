//! Activity delivery
//!
//! Handles delivering activities to remote servers.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::actor::ACTIVITY_JSON;
use super::signature::{RequestSigner, SigningContext};
use crate::error::AppError;
use crate::metrics::{ACTIVITIES_SENT, DELIVERY_DURATION_SECONDS};

/// Activity delivery service
///
/// Sends signed activities to remote inbox endpoints.
pub struct ActivityDelivery {
    http_client: Arc<reqwest::Client>,
    signer: Arc<RequestSigner>,
}

impl ActivityDelivery {
    /// Create new delivery service
    pub fn new(http_client: Arc<reqwest::Client>, signer: Arc<RequestSigner>) -> Self {
        Self {
            http_client,
            signer,
        }
    }

    /// POST a signed activity to an inbox
    ///
    /// The activity is serialised once; the `Digest` header is computed over
    /// exactly the bytes that are sent.
    ///
    /// # Errors
    /// - `Validation` for an unusable inbox URL
    /// - `KeyUnavailable` / `Signing` from the signer
    /// - `Network` on transport failure or a non-success status
    pub async fn deliver(&self, inbox: &str, activity: &Value) -> Result<(), AppError> {
        let started = Instant::now();
        let activity_type = activity
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        // 1. Serialize activity
        let body = serde_json::to_vec(activity)
            .map_err(|e| AppError::Validation(format!("Failed to serialize activity: {}", e)))?;

        // 2. Sign request
        let url = url::Url::parse(inbox)
            .map_err(|e| AppError::Validation(format!("Invalid inbox URL {}: {}", inbox, e)))?;
        let context = SigningContext::for_url("POST", &url, Some(&body))?;
        let headers = self.signer.sign_context(&context).await?;

        // 3. POST to inbox with signed headers
        let mut request = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, ACTIVITY_JSON)
            .header(reqwest::header::ACCEPT, ACTIVITY_JSON);
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }

        let response = request.body(body).send().await.map_err(|e| {
            AppError::Network(format!("Failed to deliver to {}: {}", inbox, e))
        })?;

        DELIVERY_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        // 4. Handle response
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Network(format!(
                "Inbox {} rejected activity: HTTP {}",
                inbox, status
            )));
        }

        ACTIVITIES_SENT.with_label_values(&[activity_type]).inc();
        tracing::info!(inbox = %inbox, activity_type, "Delivered activity");
        Ok(())
    }
}

/// Outcome of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

/// Result of a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Follower actor URI
    pub actor: String,
    pub outcome: DeliveryOutcome,
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}

/// Per-follower results of one fan-out, in follower order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub results: Vec<DeliveryResult>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_delivered()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.delivered_count()
    }

    /// Failed recipients with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            DeliveryOutcome::Failed(reason) => Some((r.actor.as_str(), reason.as_str())),
            DeliveryOutcome::Delivered => None,
        })
    }
}

/// Build ActivityPub activity JSON
pub mod builder {
    use serde_json::Value;

    use crate::config::AppConfig;
    use crate::data::Note;
    use crate::federation::key_signer::KeyMaterial;

    const CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

    /// Build the bot's own Person document
    pub fn person(config: &AppConfig, key: &KeyMaterial) -> Value {
        let bot_id = config.bot_id();
        let mut person = serde_json::json!({
            "@context": [CONTEXT, "https://w3id.org/security/v1"],
            "type": "Person",
            "id": bot_id,
            "name": config.bot.name,
            "preferredUsername": config.bot.preferred_username,
            "inbox": config.link("inbox"),
            "outbox": config.link("outbox"),
            "url": bot_id,
            "publicKey": {
                "id": key.key_id,
                "type": "Key",
                "owner": bot_id,
                "publicKeyPem": key.public_key_pem
            }
        });

        if let Some(summary) = &config.bot.summary {
            person["summary"] = Value::String(summary.clone());
        }
        if let Some(icon_url) = &config.bot.icon_url {
            person["icon"] = serde_json::json!({
                "type": "Image",
                "url": icon_url
            });
        }

        person
    }

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `object` - Original activity being accepted
    pub fn accept(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": "Accept",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build a Note object
    pub fn note(note: &Note, base_url: &str, attributed_to: &str) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": "Note",
            "id": note.uri(base_url),
            "attributedTo": attributed_to,
            "content": note.content,
            "published": note.published.to_rfc3339(),
            "to": note.audience()
        })
    }

    /// Build the Create activity wrapping a note
    ///
    /// The note is embedded without its `@context`, under both `object`
    /// and `note`.
    pub fn create(note: &Note, base_url: &str, actor: &str) -> Value {
        let object = embedded(self::note(note, base_url, actor));

        serde_json::json!({
            "@context": CONTEXT,
            "type": "Create",
            "id": note.activity_uri(base_url),
            "actor": actor,
            "published": object["published"].clone(),
            "to": object["to"].clone(),
            "object": object.clone(),
            "note": object
        })
    }

    /// Strip `@context` from an object embedded in another document
    pub fn embedded(mut object: Value) -> Value {
        if let Some(map) = object.as_object_mut() {
            map.remove("@context");
        }
        object
    }

    /// Paginated note collection page
    pub fn outbox_page(
        outbox_id: &str,
        page: u32,
        limit: u32,
        total: u64,
        items: Vec<Value>,
    ) -> Value {
        let mut collection = serde_json::json!({
            "@context": CONTEXT,
            "type": "OrderedCollectionPage",
            "id": format!("{}?page={}&limit={}", outbox_id, page, limit),
            "partOf": outbox_id,
            "totalItems": total,
            "orderedItems": items
        });

        if u64::from(page) * u64::from(limit) < total {
            collection["next"] = Value::String(format!(
                "{}?page={}&limit={}",
                outbox_id,
                page + 1,
                limit
            ));
        }
        if page > 1 {
            collection["prev"] = Value::String(format!(
                "{}?page={}&limit={}",
                outbox_id,
                page - 1,
                limit
            ));
        }

        collection
    }
}

#[cfg(test)]
mod tests {
    use super::builder;
    use super::*;
    use crate::config::tests::valid_config;
    use crate::data::{Note, PUBLIC_AUDIENCE};
    use crate::federation::key_signer::KeyMaterial;
    use chrono::{TimeZone, Utc};

    fn sample_note() -> Note {
        Note {
            id: "01HZX".to_string(),
            content: "<p>hoge</p>".to_string(),
            published: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn create_embeds_note_under_object_and_note() {
        let note = sample_note();
        let activity = builder::create(&note, "https://bot.example", "https://bot.example/users/bookbot");

        assert_eq!(activity["type"], "Create");
        assert_eq!(activity["id"], "https://bot.example/notes/01HZX/activity");
        assert_eq!(activity["actor"], "https://bot.example/users/bookbot");
        assert_eq!(activity["published"], "2025-01-01T00:00:00+00:00");
        assert_eq!(activity["to"][0], PUBLIC_AUDIENCE);
        assert_eq!(activity["object"], activity["note"]);
        assert_eq!(activity["object"]["id"], "https://bot.example/notes/01HZX");
        assert_eq!(activity["object"]["content"], "<p>hoge</p>");
        assert!(activity["object"].get("@context").is_none());
    }

    #[test]
    fn accept_carries_original_activity() {
        let follow = serde_json::json!({
            "type": "Follow",
            "actor": "https://remote.example/users/alice",
            "object": "https://bot.example/users/bookbot"
        });
        let accept = builder::accept(
            "https://bot.example/users/bookbot#accepts/1",
            "https://bot.example/users/bookbot",
            follow.clone(),
        );

        assert_eq!(accept["type"], "Accept");
        assert_eq!(accept["object"], follow);
    }

    #[test]
    fn person_announces_bot_id_as_key_id() {
        let config = valid_config();
        let key = KeyMaterial {
            key_id: config.bot_id(),
            algorithm: "rsa-sha256".to_string(),
            public_key_pem: "PEM".to_string(),
        };
        let person = builder::person(&config, &key);

        assert_eq!(person["id"], config.bot_id());
        assert_eq!(person["preferredUsername"], "bookbot");
        assert_eq!(person["inbox"], config.link("inbox"));
        assert_eq!(person["publicKey"]["id"], config.bot_id());
        assert_eq!(person["publicKey"]["owner"], config.bot_id());
        assert_eq!(person["publicKey"]["type"], "Key");
        assert_eq!(person["publicKey"]["publicKeyPem"], "PEM");
    }

    #[test]
    fn outbox_page_links_neighbours() {
        let outbox = "https://bot.example/outbox";
        let first = builder::outbox_page(outbox, 1, 100, 250, Vec::new());
        assert_eq!(first["next"], "https://bot.example/outbox?page=2&limit=100");
        assert!(first.get("prev").is_none());

        let last = builder::outbox_page(outbox, 3, 100, 250, Vec::new());
        assert!(last.get("next").is_none());
        assert_eq!(last["prev"], "https://bot.example/outbox?page=2&limit=100");
    }

    #[test]
    fn report_counts_outcomes() {
        let report = DeliveryReport {
            results: vec![
                DeliveryResult {
                    actor: "a".to_string(),
                    outcome: DeliveryOutcome::Delivered,
                },
                DeliveryResult {
                    actor: "b".to_string(),
                    outcome: DeliveryOutcome::Failed("HTTP 500".to_string()),
                },
            ],
        };

        assert_eq!(report.delivered_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failures().collect::<Vec<_>>(), vec![("b", "HTTP 500")]);
    }
}
