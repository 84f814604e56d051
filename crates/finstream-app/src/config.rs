//! Application configuration.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use finstream_feed::{StoreConfig, MAX_WINDOW_SECS};
use finstream_ws::{ConnectionConfig, StaticCredentials};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Env var naming the config file when `--config` is not given.
pub const CONFIG_ENV: &str = "FINSTREAM_CONFIG";
/// Config file used when neither `--config` nor `FINSTREAM_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
/// Env var holding the bearer token unless `[auth]` names another.
pub const DEFAULT_TOKEN_ENV: &str = "FINSTREAM_TOKEN";
/// Performance log interval.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;
/// Upper bound for heart-beat and reconnect delays.
pub const MAX_DELAY_MS: u64 = 3_600_000;

/// Bearer token source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token given inline. Takes precedence over `token_env`.
    #[serde(default)]
    pub token: Option<String>,
    /// Env var to read the token from.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// After this instant the token is treated as expired.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_env: default_token_env(),
            expires_at: None,
        }
    }
}

impl AuthConfig {
    /// Inline token if set, otherwise the value of `token_env`.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|t| !t.is_empty())
    }

    pub fn credentials(&self) -> StaticCredentials {
        let creds = match self.resolve_token() {
            Some(token) => StaticCredentials::new(token),
            None => {
                warn!(env = %self.token_env, "No bearer token configured");
                StaticCredentials::anonymous()
            }
        };
        match self.expires_at {
            Some(exp) => creds.with_expiry(exp),
            None => creds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Seconds between performance log lines.
    #[serde(default = "default_stats_interval_secs")]
    pub interval_secs: u64,
}

fn default_stats_interval_secs() -> u64 {
    DEFAULT_STATS_INTERVAL_SECS
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

impl AppConfig {
    /// Resolve and load the configuration.
    ///
    /// `path` (from `--config`) wins over `FINSTREAM_CONFIG`, which wins over
    /// `config/default.toml`. An explicitly named file must exist; a missing
    /// default file means built-in defaults.
    pub fn load(path: Option<String>) -> AppResult<Self> {
        let config = match path.or_else(|| std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            None => {
                warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        debug!(path, "Reading configuration");
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn validate(&self) -> AppResult<()> {
        let url = &self.connection.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "connection.url must be a ws:// or wss:// URL, got {url:?}"
            )));
        }
        if self.connection.max_reconnect_attempts == 0 {
            return Err(AppError::Config(
                "connection.max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        check_range(
            "connection.reconnect_base_delay_ms",
            self.connection.reconnect_base_delay_ms,
            0,
            MAX_DELAY_MS,
        )?;
        check_range(
            "connection.heartbeat_interval_ms",
            self.connection.heartbeat_interval_ms,
            0,
            MAX_DELAY_MS,
        )?;
        check_range(
            "store.notification_window_secs",
            self.store.notification_window_secs,
            0,
            MAX_WINDOW_SECS,
        )?;
        check_range(
            "store.throughput_window_secs",
            self.store.throughput_window_secs,
            1,
            MAX_WINDOW_SECS,
        )?;
        check_range("stats.interval_secs", self.stats.interval_secs, 1, MAX_WINDOW_SECS)?;
        Ok(())
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> AppResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(
            config.connection.url,
            "ws://localhost:8082/stock-updates/websocket"
        );
        assert_eq!(config.connection.max_reconnect_attempts, 10);
        assert_eq!(config.store.default_symbols.len(), 5);
        assert_eq!(config.stats.interval_secs, 60);
        assert_eq!(config.auth.token_env, "FINSTREAM_TOKEN");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::parse(
            r#"
            [connection]
            url = "wss://prices.example.com/stock-updates/websocket"
            reconnect_base_delay_ms = 2000

            [store]
            default_symbols = ["AMZN"]

            [stats]
            interval_secs = 15
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.reconnect_base_delay_ms, 2000);
        assert_eq!(config.connection.max_reconnect_attempts, 10);
        assert_eq!(config.connection.heartbeat_interval_ms, 25000);
        assert_eq!(config.store.default_symbols, vec!["AMZN".to_string()]);
        assert_eq!(config.store.error_capacity, 20);
        assert_eq!(config.stats.interval_secs, 15);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = AppConfig::parse("[connection\nurl = 1");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.connection.url = "http://localhost:8082".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.max_reconnect_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stats.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_windows() {
        let mut config = AppConfig::default();
        config.store.notification_window_secs = u64::MAX;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("store.notification_window_secs"), "{err}");

        let mut config = AppConfig::default();
        config.store.throughput_window_secs = MAX_WINDOW_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.store.throughput_window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.heartbeat_interval_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.reconnect_base_delay_ms = MAX_DELAY_MS + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stats.interval_secs = u64::MAX;
        assert!(config.validate().is_err());

        // Zero disables heart-beats and is allowed.
        let mut config = AppConfig::default();
        config.connection.heartbeat_interval_ms = 0;
        config.store.notification_window_secs = MAX_WINDOW_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = AppConfig::load(Some("/nonexistent/finstream.toml".to_string()));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_inline_token_wins_over_env() {
        let auth = AuthConfig {
            token: Some("inline".to_string()),
            token_env: "FINSTREAM_TEST_TOKEN_INLINE".to_string(),
            expires_at: None,
        };
        std::env::set_var("FINSTREAM_TEST_TOKEN_INLINE", "from-env");
        assert_eq!(auth.resolve_token().as_deref(), Some("inline"));
    }

    #[test]
    fn test_token_from_env() {
        let auth = AuthConfig {
            token: None,
            token_env: "FINSTREAM_TEST_TOKEN_ENV".to_string(),
            expires_at: None,
        };
        assert!(auth.resolve_token().is_none());

        std::env::set_var("FINSTREAM_TEST_TOKEN_ENV", "from-env");
        assert_eq!(auth.resolve_token().as_deref(), Some("from-env"));
    }

    #[test]
    fn test_expired_token_credentials() {
        use finstream_ws::CredentialProvider;

        let auth = AuthConfig {
            token: Some("abc".to_string()),
            token_env: "FINSTREAM_TEST_TOKEN_UNUSED".to_string(),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
        };
        let creds = auth.credentials();
        assert_eq!(creds.bearer_token().as_deref(), Some("abc"));
        assert!(!creds.is_authenticated());
    }
}
