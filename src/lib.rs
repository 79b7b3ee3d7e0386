//! apbot - the federation core of a single-actor ActivityPub bot
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Actor, inbox, outbox and note endpoints                  │
//! │  - Note publishing, metrics                                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Federation / Service Layer                     │
//! │  - HTTP Signatures (RequestSigner, SignatureVerifier)       │
//! │  - ActivityRouter, OutboxDispatcher, ActorResolver          │
//! │  - PublishService                                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx): followers, notes, reactions               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Note publishing
//! - `federation`: Signing, verification, inbox and fan-out
//! - `data`: Store traits and the SQLite implementation
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;

use federation::{
    ActivityDelivery, ActivityRouter, ActorResolver, KeyMaterial, KeySigner, OutboxDispatcher,
    RequestSigner, RsaKeySigner,
};

/// Application state shared across all handlers
///
/// Every component is built once here from the configuration and shared by
/// reference; nothing looks configuration up globally.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Public half of the signing key
    pub key: Arc<KeyMaterial>,

    /// Signs outbound requests as the bot
    pub signer: Arc<RequestSigner>,

    /// Inbox state machine
    pub router: Arc<ActivityRouter>,

    /// Note publishing and fan-out
    pub publisher: Arc<service::PublishService>,

    /// HTTP client for federation
    pub http_client: Arc<reqwest::Client>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Load the signing key
    /// 2. Connect to SQLite database
    /// 3. Wire federation components
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Load signing key
        let signer = RsaKeySigner::from_pem_file(&config.key.private_key_path)?;
        tracing::info!(path = %config.key.private_key_path.display(), "Signing key loaded");

        // 2. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;

        Self::with_components(config, Arc::new(db), Arc::new(signer)).await
    }

    /// Wire application state around an existing database and key signer
    pub async fn with_components(
        config: config::AppConfig,
        db: Arc<data::Database>,
        signer: Arc<dyn KeySigner>,
    ) -> Result<Self, error::AppError> {
        let config = Arc::new(config);
        let bot_id = config.bot_id();
        let base_url = config.server.base_url();

        let key = Arc::new(KeyMaterial::from_signer(bot_id.clone(), signer.as_ref()).await?);
        let request_signer = Arc::new(RequestSigner::new(signer, key.clone()));

        // HTTP client
        let http_client = Arc::new(
            reqwest::Client::builder()
                .user_agent(config.federation.user_agent.clone())
                .timeout(config.federation.fetch_timeout())
                .build()
                .map_err(|e| error::AppError::Internal(e.into()))?,
        );

        let resolver = Arc::new(ActorResolver::new(
            http_client.clone(),
            config.federation.actor_cache_ttl(),
        ));
        let delivery = Arc::new(ActivityDelivery::new(
            http_client.clone(),
            request_signer.clone(),
        ));

        let router = ActivityRouter::new(
            db.clone(),
            db.clone(),
            resolver.clone(),
            delivery.clone(),
            bot_id.clone(),
        )
        .with_signature_verification(config.federation.verify_inbound_signatures);

        let dispatcher = OutboxDispatcher::new(db.clone(), resolver, delivery, bot_id, base_url)
            .with_max_concurrent(config.federation.max_concurrent_deliveries)
            .with_delivery_timeout(config.federation.delivery_timeout());

        let publisher = service::PublishService::new(db.clone(), Arc::new(dispatcher));

        tracing::info!(
            bot_id = %config.bot_id(),
            verify_inbound_signatures = config.federation.verify_inbound_signatures,
            "Application state initialized successfully"
        );

        Ok(Self {
            config,
            db,
            key,
            signer: request_signer,
            router: Arc::new(router),
            publisher: Arc::new(publisher),
            http_client,
        })
    }
}

/// Maximum accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::activitypub_router())
        .merge(api::metrics_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
