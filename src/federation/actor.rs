//! Remote actor resolution
//!
//! Fetches actor documents over HTTP and keeps the few fields the bot needs.
//! An optional TTL cache avoids refetching the same actor during a fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::AppError;

/// Media type of ActivityStreams documents
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// A resolved remote actor
///
/// Immutable; use the `with_*` helpers to derive a modified copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub preferred_username: String,
    pub inbox: String,
    pub public_key_pem: Option<String>,
}

impl Actor {
    /// Extract an actor from a fetched document
    ///
    /// # Errors
    /// `InvalidActor` unless the document is an object with string `id`,
    /// `preferredUsername` and `inbox`.
    pub fn from_document(document: &Value) -> Result<Self, AppError> {
        let object = document
            .as_object()
            .ok_or_else(|| AppError::InvalidActor("Actor document is not an object".to_string()))?;

        let field = |name: &str| -> Result<String, AppError> {
            object
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| AppError::InvalidActor(format!("Actor is missing {}", name)))
        };

        let public_key_pem = object
            .get("publicKey")
            .and_then(|key| key.get("publicKeyPem"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            id: field("id")?,
            preferred_username: field("preferredUsername")?,
            inbox: field("inbox")?,
            public_key_pem,
        })
    }

    pub fn with_inbox(&self, inbox: impl Into<String>) -> Self {
        Self {
            inbox: inbox.into(),
            ..self.clone()
        }
    }

    pub fn with_public_key_pem(&self, public_key_pem: Option<String>) -> Self {
        Self {
            public_key_pem,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
struct CachedActor {
    actor: Actor,
    cached_at: Instant,
}

/// Upper bound on cached actors
const MAX_CACHED_ACTORS: usize = 10_000;

/// TTL cache of resolved actors keyed by actor URI
///
/// Expired entries are pruned when an insert finds the cache full; if it is
/// still full afterwards the oldest entry is evicted.
pub struct ActorCache {
    entries: RwLock<HashMap<String, CachedActor>>,
    ttl: Duration,
    max_entries: usize,
}

impl ActorCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_max_entries(ttl, MAX_CACHED_ACTORS)
    }

    pub fn with_max_entries(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub async fn get(&self, uri: &str) -> Option<Actor> {
        let entries = self.entries.read().await;
        entries
            .get(uri)
            .filter(|cached| cached.cached_at.elapsed() < self.ttl)
            .map(|cached| cached.actor.clone())
    }

    pub async fn insert(&self, uri: &str, actor: Actor) {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(uri) && entries.len() >= self.max_entries {
            let removed = Self::prune_expired_locked(&mut entries, self.ttl);
            if removed > 0 {
                tracing::debug!(removed, "Pruned expired actor cache entries");
            }
            if entries.len() >= self.max_entries {
                Self::evict_oldest_locked(&mut entries);
            }
        }

        entries.insert(
            uri.to_string(),
            CachedActor {
                actor,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, uri: &str) {
        self.entries.write().await.remove(uri);
    }

    fn prune_expired_locked(entries: &mut HashMap<String, CachedActor>, ttl: Duration) -> usize {
        let before = entries.len();
        entries.retain(|_, cached| cached.cached_at.elapsed() < ttl);
        before - entries.len()
    }

    fn evict_oldest_locked(entries: &mut HashMap<String, CachedActor>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, cached)| cached.cached_at)
            .map(|(uri, _)| uri.clone());
        if let Some(uri) = oldest {
            entries.remove(&uri);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Fetches remote actors
///
/// Without a cache every call performs exactly one GET. Failures are never
/// retried.
pub struct ActorResolver {
    http_client: Arc<reqwest::Client>,
    cache: Option<ActorCache>,
}

impl ActorResolver {
    pub fn new(http_client: Arc<reqwest::Client>, cache_ttl: Option<Duration>) -> Self {
        Self {
            http_client,
            cache: cache_ttl.map(ActorCache::new),
        }
    }

    /// Resolve an actor URI
    ///
    /// # Errors
    /// - `Network` on transport failure or a non-success status
    /// - `InvalidActor` when the body is not a valid actor document
    pub async fn resolve(&self, uri: &str) -> Result<Actor, AppError> {
        if let Some(cache) = &self.cache {
            if let Some(actor) = cache.get(uri).await {
                tracing::debug!(actor = %uri, "Actor cache hit");
                return Ok(actor);
            }
        }

        let actor = self.fetch(uri).await?;

        if let Some(cache) = &self.cache {
            cache.insert(uri, actor.clone()).await;
        }

        Ok(actor)
    }

    /// Forget a cached actor, e.g. after a delivery to it failed
    pub async fn invalidate(&self, uri: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(uri).await;
        }
    }

    async fn fetch(&self, uri: &str) -> Result<Actor, AppError> {
        tracing::debug!(actor = %uri, "Fetching remote actor");

        let response = self
            .http_client
            .get(uri)
            .header(reqwest::header::ACCEPT, ACTIVITY_JSON)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Failed to fetch actor {}: {}", uri, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Network(format!(
                "Actor fetch {} returned {}",
                uri, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Network(format!("Failed to read actor {}: {}", uri, e)))?;

        let document: Value = serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidActor(format!("Actor {} is not JSON: {}", uri, e)))?;

        Actor::from_document(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "id": "https://remote.example/users/alice",
            "type": "Person",
            "preferredUsername": "alice",
            "inbox": "https://remote.example/users/alice/inbox",
            "publicKey": {
                "id": "https://remote.example/users/alice#main-key",
                "publicKeyPem": "-----BEGIN PUBLIC KEY-----"
            }
        })
    }

    #[test]
    fn from_document_extracts_fields() {
        let actor = Actor::from_document(&document()).unwrap();
        assert_eq!(actor.id, "https://remote.example/users/alice");
        assert_eq!(actor.preferred_username, "alice");
        assert_eq!(actor.inbox, "https://remote.example/users/alice/inbox");
        assert_eq!(
            actor.public_key_pem.as_deref(),
            Some("-----BEGIN PUBLIC KEY-----")
        );
    }

    #[test]
    fn from_document_requires_string_fields() {
        for field in ["id", "preferredUsername", "inbox"] {
            let mut doc = document();
            doc.as_object_mut().unwrap().remove(field);
            match Actor::from_document(&doc) {
                Err(AppError::InvalidActor(msg)) => assert!(msg.contains(field)),
                other => panic!("expected InvalidActor for {field}, got: {other:?}"),
            }
        }

        let mut doc = document();
        doc["inbox"] = json!(42);
        assert!(matches!(
            Actor::from_document(&doc),
            Err(AppError::InvalidActor(_))
        ));
        assert!(matches!(
            Actor::from_document(&json!(["not", "an", "object"])),
            Err(AppError::InvalidActor(_))
        ));
    }

    #[test]
    fn with_helpers_leave_original_untouched() {
        let actor = Actor::from_document(&document()).unwrap();
        let moved = actor.with_inbox("https://remote.example/inbox");
        let keyless = actor.with_public_key_pem(None);

        assert_eq!(actor.inbox, "https://remote.example/users/alice/inbox");
        assert_eq!(moved.inbox, "https://remote.example/inbox");
        assert_eq!(moved.id, actor.id);
        assert!(keyless.public_key_pem.is_none());
        assert!(actor.public_key_pem.is_some());
    }

    #[tokio::test]
    async fn cache_expires_entries() {
        let actor = Actor::from_document(&document()).unwrap();
        let cache = ActorCache::new(Duration::from_millis(20));
        cache.insert(&actor.id, actor.clone()).await;

        assert_eq!(cache.get(&actor.id).await, Some(actor.clone()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&actor.id).await.is_none());
    }

    #[tokio::test]
    async fn cache_insert_prunes_expired_entries_when_full() {
        let actor = Actor::from_document(&document()).unwrap();
        let cache = ActorCache::with_max_entries(Duration::from_millis(20), 2);
        cache.insert("https://remote.example/users/a", actor.clone()).await;
        cache.insert("https://remote.example/users/b", actor.clone()).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.insert("https://remote.example/users/c", actor.clone()).await;

        assert_eq!(cache.len().await, 1);
        assert!(cache.get("https://remote.example/users/c").await.is_some());
    }

    #[tokio::test]
    async fn cache_evicts_oldest_live_entry_when_full() {
        let actor = Actor::from_document(&document()).unwrap();
        let cache = ActorCache::with_max_entries(Duration::from_secs(60), 2);
        cache.insert("https://remote.example/users/a", actor.clone()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert("https://remote.example/users/b", actor.clone()).await;
        cache.insert("https://remote.example/users/c", actor.clone()).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("https://remote.example/users/a").await.is_none());
        assert!(cache.get("https://remote.example/users/b").await.is_some());
        assert!(cache.get("https://remote.example/users/c").await.is_some());
    }

    #[tokio::test]
    async fn resolve_unreachable_host_is_network_error() {
        let resolver = ActorResolver::new(Arc::new(reqwest::Client::new()), None);
        match resolver.resolve("http://127.0.0.1:1/users/nobody").await {
            Err(AppError::Network(_)) => {}
            other => panic!("expected network error, got: {other:?}"),
        }
    }
}
