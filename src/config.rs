//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional JSON file,
//! then `CIVIC_NOTIFY_*` environment variables (a `.env` file in the working
//! directory is loaded first when present).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;

pub const ENV_API_URL: &str = "CIVIC_NOTIFY_API_URL";
pub const ENV_CHANNEL_URL: &str = "CIVIC_NOTIFY_CHANNEL_URL";
pub const ENV_AUTH_TOKEN: &str = "CIVIC_NOTIFY_AUTH_TOKEN";
pub const ENV_TIMEOUT_MS: &str = "CIVIC_NOTIFY_TIMEOUT_MS";
pub const ENV_RETRY_COUNT: &str = "CIVIC_NOTIFY_RETRY_COUNT";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "CIVIC_NOTIFY_MAX_RECONNECT_ATTEMPTS";
pub const ENV_POLL_INTERVAL_SECS: &str = "CIVIC_NOTIFY_POLL_INTERVAL_SECS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub retry: Backoff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default = "default_channel_url")]
    pub url: String,
    /// Consecutive failed reconnects before the session degrades to pull-only.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect: Backoff,
    /// Number of recent frame ids remembered for duplicate suppression.
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Period of the pull-only fallback once the push channel is given up on.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_channel_url() -> String {
    "http://localhost:5000/realtime".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_count() -> u32 {
    2
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_backoff() -> Backoff {
    Backoff {
        jitter: true,
        ..Backoff::default()
    }
}

fn default_dedupe_window() -> usize {
    256
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            auth_token: None,
            retry: Backoff::default(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_channel_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect: default_reconnect_backoff(),
            dedupe_window: default_dedupe_window(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            channel: ChannelConfig::default(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl SyncConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Err(error) = dotenvy::dotenv() {
            if !error.not_found() {
                tracing::warn!("ignoring unreadable .env file: {error}");
            }
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    /// Overlay values from `lookup` (normally `std::env::var`). Blank values
    /// are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get(ENV_API_URL) {
            self.api.base_url = value;
        }
        if let Some(value) = get(ENV_CHANNEL_URL) {
            self.channel.url = value;
        }
        if let Some(value) = get(ENV_AUTH_TOKEN) {
            self.api.auth_token = Some(value);
        }
        if let Some(value) = get(ENV_TIMEOUT_MS) {
            self.api.timeout_ms = parse_env(ENV_TIMEOUT_MS, value)?;
        }
        if let Some(value) = get(ENV_RETRY_COUNT) {
            self.api.retry_count = parse_env(ENV_RETRY_COUNT, value)?;
        }
        if let Some(value) = get(ENV_MAX_RECONNECT_ATTEMPTS) {
            self.channel.max_reconnect_attempts = parse_env(ENV_MAX_RECONNECT_ATTEMPTS, value)?;
        }
        if let Some(value) = get(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = parse_env(ENV_POLL_INTERVAL_SECS, value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.baseUrl cannot be empty".to_string()));
        }
        if self.channel.url.trim().is_empty() {
            return Err(ConfigError::Invalid("channel.url cannot be empty".to_string()));
        }
        if self.api.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "api.timeoutMs must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pollIntervalSecs must be greater than 0".to_string(),
            ));
        }
        if self.channel.dedupe_window == 0 {
            return Err(ConfigError::Invalid(
                "channel.dedupeWindow must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}
