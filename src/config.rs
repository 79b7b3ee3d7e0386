//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)
//!
//! The resulting `AppConfig` is built once at startup and handed to the
//! federation components by reference; nothing looks it up globally.

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub bot: BotConfig,
    pub key: KeyConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "bot.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://bot.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Bot actor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// `preferredUsername` of the bot actor
    pub preferred_username: String,
    /// Display name
    pub name: String,
    /// Profile summary (HTML)
    pub summary: Option<String>,
    /// Avatar URL
    pub icon_url: Option<String>,
}

/// Signing key configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    /// Path to the RSA private key (PKCS#8 or PKCS#1 PEM)
    pub private_key_path: PathBuf,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Upper bound for a single outbound delivery, actor resolution included
    pub delivery_timeout_seconds: u64,
    /// Timeout for each remote HTTP request
    pub fetch_timeout_seconds: u64,
    /// Concurrent deliveries during a fan-out
    pub max_concurrent_deliveries: usize,
    /// Actor cache TTL; 0 disables caching
    pub actor_cache_ttl_seconds: u64,
    /// Verify HTTP signatures on inbound activities
    pub verify_inbound_signatures: bool,
    /// User-Agent for outbound requests
    pub user_agent: String,
}

impl FederationConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// `None` when caching is disabled.
    pub fn actor_cache_ttl(&self) -> Option<Duration> {
        (self.actor_cache_ttl_seconds > 0).then(|| Duration::from_secs(self.actor_cache_ttl_seconds))
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_seconds: 10,
            fetch_timeout_seconds: 10,
            max_concurrent_deliveries: 10,
            actor_cache_ttl_seconds: 0,
            verify_inbound_signatures: false,
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("apbot/{}", env!("CARGO_PKG_VERSION"))
}

/// Content publishing configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PublishConfig {
    /// Bearer token required by `POST /notes`. Publishing is disabled when unset.
    pub token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (APBOT__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("bot.name", "apbot")?
            .set_default("key.private_key_path", "config/private_key.pem")?
            .set_default("database.path", "data/apbot.db")?
            .set_default("federation.delivery_timeout_seconds", 10)?
            .set_default("federation.fetch_timeout_seconds", 10)?
            .set_default("federation.max_concurrent_deliveries", 10)?
            .set_default("federation.actor_cache_ttl_seconds", 0)?
            .set_default("federation.verify_inbound_signatures", false)?
            .set_default("federation.user_agent", default_user_agent())?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (APBOT__*)
            .add_source(
                Environment::with_prefix("APBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Actor URI of the bot; also used as the signature `keyId`.
    pub fn bot_id(&self) -> String {
        format!(
            "{}/users/{}",
            self.server.base_url(),
            self.bot.preferred_username
        )
    }

    /// Absolute URL for a path under the base URL.
    pub fn link(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server.base_url(),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        let username = self.bot.preferred_username.trim();
        if username.is_empty() || username.contains('/') {
            return Err(AppError::Config(
                "bot.preferred_username must be a non-empty path segment".to_string(),
            ));
        }

        if self.federation.max_concurrent_deliveries == 0 {
            return Err(AppError::Config(
                "federation.max_concurrent_deliveries must be greater than 0".to_string(),
            ));
        }

        if self.federation.delivery_timeout_seconds == 0
            || self.federation.fetch_timeout_seconds == 0
        {
            return Err(AppError::Config(
                "federation timeouts must be greater than 0".to_string(),
            ));
        }

        if !self.server.protocol.eq_ignore_ascii_case("https") {
            if is_local_server_domain(&self.server.domain) {
                tracing::warn!(
                    domain = %self.server.domain,
                    "Serving federation endpoints over plain http for local development"
                );
            } else {
                return Err(AppError::Config(
                    "server.protocol must be https for non-local server domains".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            bot: BotConfig {
                preferred_username: "bookbot".to_string(),
                name: "Book Bot".to_string(),
                summary: None,
                icon_url: None,
            },
            key: KeyConfig {
                private_key_path: PathBuf::from("/tmp/apbot-test-key.pem"),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/apbot-test.db"),
            },
            federation: FederationConfig::default(),
            publish: PublishConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_http_on_localhost() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_http_for_non_local_domain() {
        let mut config = valid_config();
        config.server.domain = "bot.example.com".to_string();

        let error = config
            .validate()
            .expect_err("public domains must require https");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("server.protocol must be https")
        ));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = valid_config();
        config.federation.max_concurrent_deliveries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bot_id_and_links_derive_from_base_url() {
        let mut config = valid_config();
        config.server.domain = "bot.example.com".to_string();
        config.server.protocol = "https".to_string();

        assert_eq!(config.bot_id(), "https://bot.example.com/users/bookbot");
        assert_eq!(config.link("/inbox"), "https://bot.example.com/inbox");
        assert_eq!(config.link("notes/01H"), "https://bot.example.com/notes/01H");
    }

    #[test]
    fn actor_cache_ttl_zero_disables_cache() {
        let mut federation = FederationConfig::default();
        assert!(federation.actor_cache_ttl().is_none());
        federation.actor_cache_ttl_seconds = 60;
        assert_eq!(federation.actor_cache_ttl(), Some(Duration::from_secs(60)));
    }
}
