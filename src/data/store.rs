//! Store traits
//!
//! The federation components depend on these interfaces rather than on
//! SQLite directly. `Database` implements all of them.

use std::future::Future;

use axum::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use super::models::{Follower, Note, Pagination, Reaction};
use crate::error::AppError;

/// Persistent set of followers keyed by actor URI.
#[async_trait]
pub trait FollowerStore: Send + Sync {
    /// Insert a follower.
    ///
    /// Idempotent: returns `false` when the actor already follows.
    async fn add(&self, actor: &str) -> Result<bool, AppError>;

    /// Delete a follower, returning the number of removed rows (0 or 1).
    ///
    /// Removing an unknown actor is not an error.
    async fn remove(&self, actor: &str) -> Result<u64, AppError>;

    /// All followers in insertion order.
    async fn list_all(&self) -> Result<Vec<Follower>, AppError>;

    /// Up to `limit` followers inserted after the follower with row id
    /// `after`, in insertion order. `None` starts from the beginning.
    async fn list_page(&self, limit: u32, after: Option<i64>) -> Result<Vec<Follower>, AppError>;

    /// Lazily drain followers page by page.
    ///
    /// Pages are keyed on the last row seen, so followers removed or added
    /// while the stream is draining never shift the remaining ones. The
    /// stream cannot be restarted; calling `pages` again queries the store
    /// from the beginning.
    fn pages(&self, page_size: u32) -> BoxStream<'_, Result<Follower, AppError>> {
        paged(
            page_size,
            |follower: &Follower| follower.id,
            move |limit, after| self.list_page(limit, after),
        )
    }
}

/// Append-only note storage.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Store a new note with a fresh storage key and the current time.
    async fn insert_note(&self, content: &str) -> Result<Note, AppError>;

    /// Get a note by storage key.
    async fn get_note(&self, id: &str) -> Result<Option<Note>, AppError>;

    /// One page of notes in insertion order. Out-of-range pages are empty.
    async fn list_notes(&self, page: Pagination) -> Result<Vec<Note>, AppError>;

    /// Number of stored notes.
    async fn count_notes(&self) -> Result<u64, AppError>;
}

/// Best-effort log of Likes and Announces.
#[async_trait]
pub trait ReactionStore: Send + Sync {
    async fn record_reaction(&self, reaction: &Reaction) -> Result<(), AppError>;
}

/// Turn a keyset page fetcher into a lazy stream of items.
///
/// `fetch` receives the page size and the key of the last item already
/// yielded (`None` for the first page). Fetching stops after the first
/// short page. Nothing is fetched until the stream is polled.
pub fn paged<'a, T, K, C, F, Fut>(
    page_size: u32,
    key: C,
    fetch: F,
) -> BoxStream<'a, Result<T, AppError>>
where
    T: Send + 'a,
    K: Clone + Send + 'a,
    C: Fn(&T) -> K + Send + 'a,
    F: Fn(u32, Option<K>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Vec<T>, AppError>> + Send + 'a,
{
    let page_size = page_size.max(1);

    stream::try_unfold(
        (fetch, key, None::<K>, false),
        move |(fetch, key, after, exhausted)| async move {
            if exhausted {
                return Ok::<_, AppError>(None);
            }

            let items = fetch(page_size, after.clone()).await?;
            let exhausted = items.len() < page_size as usize;
            let next = items.last().map(&key).or(after);

            Ok(Some((
                stream::iter(items.into_iter().map(Ok::<T, AppError>)),
                (fetch, key, next, exhausted),
            )))
        },
    )
    .try_flatten()
    .boxed()
}
