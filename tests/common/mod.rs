//! Common test utilities for E2E tests
//!
//! `TestServer` runs the bot on an ephemeral port; `FakeRemote` plays a
//! remote ActivityPub server that serves actor documents and records every
//! POST to its inboxes.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use apbot::data::Database;
use apbot::federation::{
    HeaderList, KeyMaterial, KeySigner, RequestSigner, RsaKeySigner, SigningContext,
};
use apbot::{AppState, config};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const PUBLISH_TOKEN: &str = "test-publish-token";

/// Remote actor name whose document is not found
pub const BROKEN_ACTOR: &str = "broken";
/// Remote actor name whose inbox answers 500
pub const DOWN_ACTOR: &str = "down";
/// Remote actor name whose inbox never answers in time
pub const SLOW_ACTOR: &str = "slow";

static METRICS: Once = Once::new();

/// Register metrics once per test binary
pub fn init_metrics() {
    METRICS.call_once(apbot::metrics::init_metrics);
}

pub fn generate_key() -> rsa::RsaPrivateKey {
    let mut rng = rand::thread_rng();
    rsa::RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work")
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_federation(|_| {}).await
    }

    /// Create a test server with adjusted federation settings
    pub async fn with_federation(adjust: impl FnOnce(&mut config::FederationConfig)) -> Self {
        Self::build(adjust, Arc::new(RsaKeySigner::new(generate_key()))).await
    }

    /// Create a test server signing through `signer`
    pub async fn with_signer(signer: Arc<dyn KeySigner>) -> Self {
        Self::build(|_| {}, signer).await
    }

    async fn build(
        adjust: impl FnOnce(&mut config::FederationConfig),
        signer: Arc<dyn KeySigner>,
    ) -> Self {
        init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Bind first so the configured domain matches the real address
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut federation = config::FederationConfig {
            delivery_timeout_seconds: 2,
            fetch_timeout_seconds: 2,
            ..Default::default()
        };
        adjust(&mut federation);

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                domain: addr.to_string(),
                protocol: "http".to_string(),
            },
            bot: config::BotConfig {
                preferred_username: "bookbot".to_string(),
                name: "Book Bot".to_string(),
                summary: Some("New books, daily".to_string()),
                icon_url: None,
            },
            key: config::KeyConfig {
                private_key_path: temp_dir.path().join("unused.pem"),
            },
            database: config::DatabaseConfig {
                path: db_path.clone(),
            },
            federation,
            publish: config::PublishConfig {
                token: Some(PUBLISH_TOKEN.to_string()),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let db = Arc::new(Database::connect(&db_path).await.unwrap());
        let state = AppState::with_components(config, db, signer)
            .await
            .unwrap();

        let app = apbot::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            addr: format!("http://{}", addr),
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// POST an activity to the inbox, unsigned
    pub async fn post_inbox(&self, activity: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/inbox"))
            .header("Content-Type", "application/activity+json")
            .body(activity.to_string())
            .send()
            .await
            .unwrap()
    }
}

/// A request received by the fake remote
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    /// Actor name owning the inbox
    pub actor: String,
    pub path: String,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl ReceivedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct RemoteState {
    base_url: String,
    public_key_pem: String,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

/// Fake remote ActivityPub server
pub struct FakeRemote {
    pub base_url: String,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    signer: Arc<RsaKeySigner>,
}

impl FakeRemote {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let signer = Arc::new(RsaKeySigner::new(generate_key()));
        let received = Arc::new(Mutex::new(Vec::new()));

        let state = RemoteState {
            base_url: base_url.clone(),
            public_key_pem: signer.public_key_pem().await.unwrap(),
            received: received.clone(),
        };

        let app = Router::new()
            .route("/users/:name", get(remote_actor))
            .route("/users/:name/inbox", post(remote_inbox))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            received,
            signer,
        }
    }

    /// Actor URI of a remote user
    pub fn actor(&self, name: &str) -> String {
        format!("{}/users/{}", self.base_url, name)
    }

    /// Inbox URI of a remote user
    pub fn inbox(&self, name: &str) -> String {
        format!("{}/users/{}/inbox", self.base_url, name)
    }

    /// Requests received so far
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }

    /// Requests received for one actor's inbox
    pub fn received_by(&self, name: &str) -> Vec<ReceivedRequest> {
        self.received()
            .into_iter()
            .filter(|request| request.actor == name)
            .collect()
    }

    /// Sign and POST an activity to `inbox_url` as the remote actor `name`
    pub async fn send_signed(
        &self,
        name: &str,
        inbox_url: &str,
        body: &[u8],
    ) -> reqwest::Response {
        let key = KeyMaterial::from_signer(self.actor(name), self.signer.as_ref())
            .await
            .unwrap();
        let signer = RequestSigner::new(self.signer.clone(), Arc::new(key));

        let url = url::Url::parse(inbox_url).unwrap();
        let context = SigningContext::for_url("POST", &url, Some(body)).unwrap();
        let headers = signer.sign_context(&context).await.unwrap();

        let mut request = reqwest::Client::new()
            .post(inbox_url)
            .header("Content-Type", "application/activity+json");
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }
        request.body(body.to_vec()).send().await.unwrap()
    }
}

async fn remote_actor(State(state): State<RemoteState>, Path(name): Path<String>) -> Response {
    if name == BROKEN_ACTOR {
        return StatusCode::NOT_FOUND.into_response();
    }

    let id = format!("{}/users/{}", state.base_url, name);
    Json(serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Person",
        "id": id,
        "preferredUsername": name,
        "inbox": format!("{}/inbox", id),
        "publicKey": {
            "id": format!("{}#main-key", id),
            "owner": id,
            "publicKeyPem": state.public_key_pem
        }
    }))
    .into_response()
}

async fn remote_inbox(
    State(state): State<RemoteState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.received.lock().unwrap().push(ReceivedRequest {
        actor: name.clone(),
        path: format!("/users/{}/inbox", name),
        headers: HeaderList::from(&headers),
        body,
    });

    match name.as_str() {
        DOWN_ACTOR => StatusCode::INTERNAL_SERVER_ERROR,
        SLOW_ACTOR => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::ACCEPTED
        }
        _ => StatusCode::ACCEPTED,
    }
}
