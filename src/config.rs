//! Configuration module for feed-relay.

use serde::Deserialize;
use std::path::Path;

use crate::{RelayError, Result};

/// Environment variable that overrides `feed.bearer_token`.
pub const BEARER_TOKEN_ENV: &str = "FEED_RELAY_BEARER_TOKEN";

/// Upstream feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Identifier of the feed, used as the cursor key.
    #[serde(default = "default_feed_id")]
    pub id: String,
    /// Endpoint returning the newest items of the feed.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub bearer_token: String,
    /// Value of the `exclude` query parameter.
    #[serde(default = "default_exclude")]
    pub exclude: String,
    /// Items requested per page.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Maximum number of pages followed in one fetch.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Polling interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Message sent for every item. `{id}` and `{text}` are substituted.
    #[serde(default = "default_message_template")]
    pub message_template: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
}

fn default_feed_id() -> String {
    "lotro".to_string()
}

fn default_endpoint() -> String {
    "https://api.twitter.com/2/users/0/tweets".to_string()
}

fn default_exclude() -> String {
    "retweets,replies".to_string()
}

fn default_max_results() -> u32 {
    10
}

fn default_max_pages() -> u32 {
    50
}

fn default_poll_interval() -> u64 {
    300 // 5 minutes
}

fn default_message_template() -> String {
    "https://twitter.com/lotro/status/{id}".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            id: default_feed_id(),
            endpoint: default_endpoint(),
            bearer_token: String::new(),
            exclude: default_exclude(),
            max_results: default_max_results(),
            max_pages: default_max_pages(),
            poll_interval_secs: default_poll_interval(),
            message_template: default_message_template(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
        }
    }
}

/// Delivery (outgoing message) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_delivery_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_delivery_total_timeout")]
    pub total_timeout_secs: u64,
}

fn default_delivery_connect_timeout() -> u64 {
    10
}

fn default_delivery_total_timeout() -> u64 {
    15
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_delivery_connect_timeout(),
            total_timeout_secs: default_delivery_total_timeout(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feed-relay.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feed-relay.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Upstream feed configuration.
    #[serde(default)]
    pub feed: FeedConfig,
    /// Delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEED_RELAY_BEARER_TOKEN`: Override the upstream bearer token
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(BEARER_TOKEN_ENV) {
            if !token.is_empty() {
                self.feed.bearer_token = token;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let feed = &self.feed;
        if feed.id.trim().is_empty() {
            return Err(RelayError::Config("feed.id must not be empty".to_string()));
        }
        if feed.bearer_token.is_empty() {
            return Err(RelayError::Config(format!(
                "feed.bearer_token is not set. Set it in config.toml or via {BEARER_TOKEN_ENV}."
            )));
        }
        url::Url::parse(&feed.endpoint)
            .map_err(|e| RelayError::Config(format!("feed.endpoint is invalid: {e}")))?;
        if !(5..=100).contains(&feed.max_results) {
            return Err(RelayError::Config(format!(
                "feed.max_results must be between 5 and 100, got {}",
                feed.max_results
            )));
        }
        if feed.max_pages == 0 {
            return Err(RelayError::Config("feed.max_pages must be at least 1".to_string()));
        }
        if feed.poll_interval_secs == 0 {
            return Err(RelayError::Config(
                "feed.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if feed.message_template.trim().is_empty() {
            return Err(RelayError::Config(
                "feed.message_template must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
