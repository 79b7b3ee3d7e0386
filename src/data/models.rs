//! Data models
//!
//! Rust structs representing stored entities.
//! Notes use ULID storage keys and chrono timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Follower
// =============================================================================

/// A remote actor subscribed to the bot's notes
///
/// At most one row exists per actor URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follower {
    /// Row id, increasing with insertion order
    pub id: i64,
    /// Actor URI
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Note
// =============================================================================

/// Public audience collection
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// A note published by the bot
///
/// Created once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Note {
    /// Opaque storage key (ULID)
    pub id: String,
    /// HTML content
    pub content: String,
    pub published: DateTime<Utc>,
}

impl Note {
    /// External ActivityStreams id
    pub fn uri(&self, base_url: &str) -> String {
        format!("{}/notes/{}", base_url, self.id)
    }

    /// Id of the Create activity wrapping this note
    pub fn activity_uri(&self, base_url: &str) -> String {
        format!("{}/activity", self.uri(base_url))
    }

    /// Audience of every note; the bot only publishes publicly.
    pub fn audience(&self) -> Vec<String> {
        vec![PUBLIC_AUDIENCE.to_string()]
    }
}

// =============================================================================
// Reactions
// =============================================================================

/// Kind of a recorded reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReactionKind {
    Like,
    Announce,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Announce => "announce",
        }
    }
}

/// A Like or Announce received at the inbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub kind: ReactionKind,
    /// Actor URI of the sender, when present
    pub actor: Option<String>,
    /// Liked/announced object URI, when present
    pub object: Option<String>,
    /// Raw activity JSON
    pub activity: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// Pagination
// =============================================================================

/// Page size used when the caller does not ask for one
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
/// Largest page the outbox serves
pub const MAX_PAGE_LIMIT: u32 = 100;

/// 1-based page over notes in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Build from optional query values
    ///
    /// # Errors
    /// `Validation` for `page=0`, `limit=0` or a limit above the maximum.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Result<Self, crate::error::AppError> {
        use crate::error::AppError;

        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);

        if page == 0 {
            return Err(AppError::Validation("page starts at 1".to_string()));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        Ok(Self { page, limit })
    }

    /// Number of rows skipped before this page
    pub fn skip(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}
