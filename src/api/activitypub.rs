//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (activity receiving)
//! - Outbox and notes
//! - Note publishing

use axum::body::Bytes;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::AppState;
use crate::data::{NoteStore, Pagination};
use crate::error::AppError;
use crate::federation::{ACTIVITY_JSON, HeaderList, InboundRequest, builder};

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:username - Actor profile
/// - POST /inbox - Inbox
/// - GET /outbox - Paginated notes
/// - GET /notes/:id - Note
/// - GET /notes/:id/activity - Create activity of a note
/// - POST /notes - Publish a note
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:username", get(actor))
        .route("/inbox", post(inbox))
        .route("/outbox", get(outbox))
        .route("/notes", post(publish))
        .route("/notes/:id", get(note))
        .route("/notes/:id/activity", get(note_activity))
}

/// JSON body served as `application/activity+json`
pub struct ActivityJson(pub Value);

impl IntoResponse for ActivityJson {
    fn into_response(self) -> Response {
        (
            [(header::CONTENT_TYPE, ACTIVITY_JSON)],
            Json(self.0),
        )
            .into_response()
    }
}

/// GET /users/:username
///
/// Returns the bot's Actor document.
async fn actor(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<ActivityJson, AppError> {
    if username != state.config.bot.preferred_username {
        return Err(AppError::NotFound);
    }

    Ok(ActivityJson(builder::person(&state.config, &state.key)))
}

/// POST /inbox
///
/// Receives incoming ActivityPub activities.
async fn inbox(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let headers = HeaderList::from(&headers);
    let path = uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or_else(|| uri.path());

    let outcome = state
        .router
        .receive(InboundRequest {
            method: method.as_str(),
            path,
            headers: &headers,
            body: &body,
        })
        .await?;

    tracing::debug!(?outcome, "Inbox activity processed");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct OutboxQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

/// GET /outbox?page=N&limit=M
///
/// Notes in publication order, `limit` per page (default 100).
async fn outbox(
    State(state): State<AppState>,
    Query(query): Query<OutboxQuery>,
) -> Result<ActivityJson, AppError> {
    let page = Pagination::new(query.page, query.limit)?;
    let base_url = state.config.server.base_url();
    let bot_id = state.config.bot_id();

    let notes = state.db.list_notes(page).await?;
    let total = state.db.count_notes().await?;

    let items = notes
        .iter()
        .map(|note| builder::embedded(builder::note(note, &base_url, &bot_id)))
        .collect();

    Ok(ActivityJson(builder::outbox_page(
        &state.config.link("outbox"),
        page.page,
        page.limit,
        total,
        items,
    )))
}

/// GET /notes/:id
async fn note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ActivityJson, AppError> {
    let note = state.db.get_note(&id).await?.ok_or(AppError::NotFound)?;

    Ok(ActivityJson(builder::note(
        &note,
        &state.config.server.base_url(),
        &state.config.bot_id(),
    )))
}

/// GET /notes/:id/activity
async fn note_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ActivityJson, AppError> {
    let note = state.db.get_note(&id).await?.ok_or(AppError::NotFound)?;

    Ok(ActivityJson(builder::create(
        &note,
        &state.config.server.base_url(),
        &state.config.bot_id(),
    )))
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    content: String,
}

/// POST /notes
///
/// Stores a note and delivers it to every follower. Requires
/// `Authorization: Bearer <publish.token>`; publishing is disabled when no
/// token is configured.
async fn publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    authorize_publisher(&state, &headers)?;

    let published = state.publisher.publish(&request.content).await?;
    let base_url = state.config.server.base_url();

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": published.note.uri(&base_url),
            "published": published.note.published.to_rfc3339(),
            "delivered": published.report.delivered_count(),
            "failed": published.report.failed_count(),
        })),
    ))
}

fn authorize_publisher(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state
        .config
        .publish
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthorized)?;

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if !tokens_match(provided, expected) {
        tracing::warn!("Rejected publish request with wrong token");
        return Err(AppError::Unauthorized);
    }

    Ok(())
}

/// Constant-time token comparison over fixed-length digests
fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided.as_slice().ct_eq(expected.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_only_identical_tokens() {
        assert!(tokens_match("s3cret-token", "s3cret-token"));
        assert!(!tokens_match("s3cret-tokeN", "s3cret-token"));
        assert!(!tokens_match("s3cret", "s3cret-token"));
        assert!(!tokens_match("", "s3cret-token"));
    }
}
