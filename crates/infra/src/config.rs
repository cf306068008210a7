//! Engine configuration loading and representation.

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_NOTIFICATION_TOPIC: &str = "event-view";
pub const DEFAULT_REDIS_BLOCK_MS: u64 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Settings shared by event sources, views and the durable adapters.
///
/// Misconfiguration is a startup error; nothing here is re-read at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Events fetched per store read.
    pub page_size: usize,
    /// Topic views listen on for catch-up notifications.
    pub notification_topic: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    /// How long a Redis consumer blocks waiting for new stream entries.
    pub redis_block_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            notification_topic: DEFAULT_NOTIFICATION_TOPIC.to_string(),
            database_url: None,
            redis_url: None,
            redis_block_ms: DEFAULT_REDIS_BLOCK_MS,
        }
    }
}

impl EngineConfig {
    pub const PAGE_SIZE_VAR: &'static str = "EVENTIDE_PAGE_SIZE";
    pub const TOPIC_VAR: &'static str = "EVENTIDE_TOPIC";
    pub const DATABASE_URL_VAR: &'static str = "DATABASE_URL";
    pub const REDIS_URL_VAR: &'static str = "REDIS_URL";
    pub const REDIS_BLOCK_MS_VAR: &'static str = "EVENTIDE_REDIS_BLOCK_MS";

    /// Load from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(Self::PAGE_SIZE_VAR) {
            config.page_size = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(Self::PAGE_SIZE_VAR, format!("{e}")))?;
        }
        if let Some(raw) = lookup(Self::TOPIC_VAR) {
            config.notification_topic = raw.trim().to_string();
        }
        config.database_url = lookup(Self::DATABASE_URL_VAR).filter(|v| !v.trim().is_empty());
        config.redis_url = lookup(Self::REDIS_URL_VAR).filter(|v| !v.trim().is_empty());
        if let Some(raw) = lookup(Self::REDIS_BLOCK_MS_VAR) {
            config.redis_block_ms = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(Self::REDIS_BLOCK_MS_VAR, format!("{e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::invalid(Self::PAGE_SIZE_VAR, "must be at least 1"));
        }
        if self.notification_topic.is_empty() {
            return Err(ConfigError::invalid(Self::TOPIC_VAR, "must not be empty"));
        }
        Ok(())
    }
}
