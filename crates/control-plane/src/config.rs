//! Configuration management for the control plane.

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use control_common::constants::{
    DEFAULT_LISTEN_ADDR, DEFAULT_LOG_REQUEST_TIMEOUT_SECS, DEFAULT_LOG_REQUEST_TTL_SECS,
    DEFAULT_LOG_SWEEP_INTERVAL_SECS, DEFAULT_REDIS_URL, DEFAULT_REGISTRATION_TOKEN_TTL_SECS,
    DEFAULT_SUBSCRIBER_CAPACITY, agent_resources,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Persistence backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Registration token configuration
    #[serde(default)]
    pub token: TokenConfig,

    /// Pending log request timing
    #[serde(default)]
    pub log_requests: LogRequestConfig,

    /// Agent resources removed on teardown
    #[serde(default)]
    pub teardown: TeardownConfig,

    /// Live subscriber configuration
    #[serde(default)]
    pub subscribers: SubscriberConfig,
}

/// Where clusters and workflow runs are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Redis, shared between replicas
    #[default]
    Redis,
    /// Process memory (development and tests)
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Registration token configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Token validity in seconds
    #[serde(default = "default_token_ttl")]
    pub ttl_secs: u64,

    /// Path to a 32-byte ed25519 signing key (ephemeral if unset)
    #[serde(default)]
    pub signing_key_path: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_token_ttl(),
            signing_key_path: None,
        }
    }
}

/// Pending log request timing
#[derive(Debug, Clone, Deserialize)]
pub struct LogRequestConfig {
    /// How long a requester waits for the agent
    #[serde(default = "default_log_timeout")]
    pub timeout_secs: u64,

    /// Age after which an orphaned entry is evicted
    #[serde(default = "default_log_ttl")]
    pub ttl_secs: u64,

    /// Sweeper interval
    #[serde(default = "default_log_sweep")]
    pub sweep_interval_secs: u64,
}

impl LogRequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for LogRequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_log_timeout(),
            ttl_secs: default_log_ttl(),
            sweep_interval_secs: default_log_sweep(),
        }
    }
}

/// Agent resources removed on teardown
#[derive(Debug, Clone, Deserialize)]
pub struct TeardownConfig {
    #[serde(default = "default_agent_deployment")]
    pub agent_deployment: String,

    #[serde(default = "default_agent_config_map")]
    pub agent_config_map: String,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            agent_deployment: default_agent_deployment(),
            agent_config_map: default_agent_config_map(),
        }
    }
}

/// Live subscriber configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    /// Events buffered per subscriber before new ones are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Ten years
const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_token_ttl() -> u64 { DEFAULT_REGISTRATION_TOKEN_TTL_SECS }
fn default_log_timeout() -> u64 { DEFAULT_LOG_REQUEST_TIMEOUT_SECS }
fn default_log_ttl() -> u64 { DEFAULT_LOG_REQUEST_TTL_SECS }
fn default_log_sweep() -> u64 { DEFAULT_LOG_SWEEP_INTERVAL_SECS }
fn default_agent_deployment() -> String { agent_resources::DEPLOYMENT_NAME.to_string() }
fn default_agent_config_map() -> String { agent_resources::CONFIG_MAP_NAME.to_string() }
fn default_channel_capacity() -> usize { DEFAULT_SUBSCRIBER_CAPACITY }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(storage) = args.storage {
            config.storage.backend = storage;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall background tasks or overflow expiries
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_TOKEN_TTL_SECS).contains(&self.token.ttl_secs),
            "token.ttl_secs must be between 1 and {}",
            MAX_TOKEN_TTL_SECS
        );

        let logs = &self.log_requests;
        ensure!(logs.timeout_secs > 0, "log_requests.timeout_secs must be positive");
        ensure!(logs.sweep_interval_secs > 0, "log_requests.sweep_interval_secs must be positive");
        ensure!(
            logs.ttl_secs >= logs.timeout_secs,
            "log_requests.ttl_secs must not be shorter than log_requests.timeout_secs"
        );

        ensure!(self.subscribers.channel_capacity > 0, "subscribers.channel_capacity must be positive");
        Ok(())
    }

    /// In-memory configuration used by tests
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
            },
            ..Self::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            storage: StorageConfig::default(),
            token: TokenConfig::default(),
            log_requests: LogRequestConfig::default(),
            teardown: TeardownConfig::default(),
            subscribers: SubscriberConfig::default(),
        }
    }
}
