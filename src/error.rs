//! Error types for apbot
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// The federation core distinguishes client-side rejections (malformed
/// activities, bad media types) from server-side processing failures
/// (unreachable actors, signing failures). The HTTP mapping below keeps
/// that split visible to remote senders.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Inbound signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Activity body is not an object, lacks `type`, or has an unsupported type (400)
    #[error("Malformed activity: {0}")]
    MalformedActivity(String),

    /// Inbox called with a content type other than `application/activity+json` (415)
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// A header named in the signed header list is missing (400)
    #[error("Missing required header: {0}")]
    MissingRequiredHeader(String),

    /// Actor fetch or delivery transport failure (502)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote actor document is missing required fields (502)
    #[error("Invalid actor: {0}")]
    InvalidActor(String),

    /// Signing service reported a cryptographic failure (500)
    #[error("Signing error: {0}")]
    Signing(String),

    /// Signing key or service cannot be reached (503)
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the error was caused by the request rather than by processing it.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// HTTP status code this error maps to at the boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::Validation(_)
            | AppError::MalformedActivity(_)
            | AppError::MissingRequiredHeader(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Network(_) | AppError::InvalidActor(_) => StatusCode::BAD_GATEWAY,
            AppError::KeyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Signing(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Validation(_) => "validation",
            AppError::MalformedActivity(_) => "malformed_activity",
            AppError::UnsupportedMediaType(_) => "unsupported_media_type",
            AppError::MissingRequiredHeader(_) => "missing_required_header",
            AppError::Network(_) => "network",
            AppError::InvalidActor(_) => "invalid_actor",
            AppError::Signing(_) => "signing",
            AppError::KeyUnavailable(_) => "key_unavailable",
            AppError::Database(_) => "database",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Internal details of storage and internal errors are not echoed
    /// back to the caller.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status_code();
        let error_type = self.error_type();
        let error_message = match &self {
            AppError::Database(_) => "Database error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        } else {
            tracing::debug!(error = %self, error_type, "Request rejected");
        }

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[error_type])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
