//! SQLite database operations
//!
//! All persistent state goes through this module: followers, notes and
//! received reactions. Uniqueness of followers is enforced by the schema,
//! so concurrent Follow activities for the same actor cannot race into
//! duplicate rows.

use std::path::Path;

use axum::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite, SqlitePool};

use super::models::*;
use super::store::{FollowerStore, NoteStore, ReactionStore};
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Count followers.
    pub async fn count_followers(&self) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM followers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Number of reactions of one kind recorded for an object URI.
    pub async fn count_reactions(&self, object: &str, kind: ReactionKind) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reactions WHERE object = ? AND kind = ?",
        )
        .bind(object)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl FollowerStore for Database {
    async fn add(&self, actor: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO followers (actor, created_at) VALUES (?, ?) ON CONFLICT(actor) DO NOTHING",
        )
        .bind(actor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, actor: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE actor = ?")
            .bind(actor)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_all(&self) -> Result<Vec<Follower>, AppError> {
        let followers = sqlx::query_as::<_, Follower>(
            "SELECT id, actor, created_at FROM followers ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(followers)
    }

    async fn list_page(&self, limit: u32, after: Option<i64>) -> Result<Vec<Follower>, AppError> {
        let followers = sqlx::query_as::<_, Follower>(
            "SELECT id, actor, created_at FROM followers WHERE id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(after.unwrap_or(0))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(followers)
    }
}

#[async_trait]
impl NoteStore for Database {
    async fn insert_note(&self, content: &str) -> Result<Note, AppError> {
        let note = Note {
            id: EntityId::new().0,
            content: content.to_string(),
            published: Utc::now(),
        };

        sqlx::query("INSERT INTO notes (id, content, published) VALUES (?, ?, ?)")
            .bind(&note.id)
            .bind(&note.content)
            .bind(note.published)
            .execute(&self.pool)
            .await?;

        Ok(note)
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>, AppError> {
        let note =
            sqlx::query_as::<_, Note>("SELECT id, content, published FROM notes WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(note)
    }

    async fn list_notes(&self, page: Pagination) -> Result<Vec<Note>, AppError> {
        let notes = sqlx::query_as::<_, Note>(
            "SELECT id, content, published FROM notes ORDER BY rank ASC LIMIT ? OFFSET ?",
        )
        .bind(i64::from(page.limit))
        .bind(page.skip() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(notes)
    }

    async fn count_notes(&self) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ReactionStore for Database {
    async fn record_reaction(&self, reaction: &Reaction) -> Result<(), AppError> {
        let activity = serde_json::to_string(&reaction.activity)
            .map_err(|e| AppError::Internal(e.into()))?;

        sqlx::query(
            "INSERT INTO reactions (kind, actor, object, activity, received_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reaction.kind.as_str())
        .bind(&reaction.actor)
        .bind(&reaction.object)
        .bind(activity)
        .bind(reaction.received_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
