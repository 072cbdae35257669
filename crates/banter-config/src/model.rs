//! Configuration schema for Banter.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root config for the Banter service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BanterConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl BanterConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> BanterConfigBuilder {
        BanterConfigBuilder::new()
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.discovery_interval_ms == 0 {
            return Err(ConfigError::InvalidField {
                path: "queue.discovery_interval_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.queue.error_backoff_ms == 0 {
            return Err(ConfigError::InvalidField {
                path: "queue.error_backoff_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.queue.read_batch_size == 0 {
            return Err(ConfigError::InvalidField {
                path: "queue.read_batch_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.queue.job_timeout_secs == 0 {
            return Err(ConfigError::InvalidField {
                path: "queue.job_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.relay.chunk_ttl_secs == 0 {
            return Err(ConfigError::InvalidField {
                path: "relay.chunk_ttl_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.server.host.is_empty() {
            return Err(ConfigError::InvalidField {
                path: "server.host".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidField {
                path: "server.port".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for assembling a `BanterConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct BanterConfigBuilder {
    config: BanterConfig,
}

impl BanterConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: BanterConfig::default(),
        }
    }

    /// Replace the queue configuration.
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config.queue = queue;
        self
    }

    /// Replace the chunk relay configuration.
    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.config.relay = relay;
        self
    }

    /// Replace the conversation history configuration.
    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.config.history = history;
        self
    }

    /// Replace the HTTP server configuration.
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Replace the persistence configuration.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Finalize and return the built `BanterConfig`.
    pub fn build(self) -> BanterConfig {
        self.config
    }
}

/// Configuration for the queue dispatcher and job processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pause between backlog discovery passes, in milliseconds.
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
    /// Pause after a failed discovery pass, in milliseconds.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Upper bound on a single job's agent streaming phase, in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Entries claimed per read while draining one conversation.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: default_discovery_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            job_timeout_secs: default_job_timeout_secs(),
            read_batch_size: default_read_batch_size(),
        }
    }
}

impl QueueConfig {
    /// Discovery pass interval as a `Duration`.
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    /// Backoff after a failed discovery pass as a `Duration`.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Per-job streaming timeout as a `Duration`.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

fn default_discovery_interval_ms() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    5000
}

fn default_job_timeout_secs() -> u64 {
    120
}

fn default_read_batch_size() -> usize {
    1
}

/// Configuration for the ephemeral chunk relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Lifetime of a job's relay state, refreshed on every write, in seconds.
    #[serde(default = "default_chunk_ttl_secs")]
    pub chunk_ttl_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_ttl_secs: default_chunk_ttl_secs(),
        }
    }
}

impl RelayConfig {
    /// Relay TTL as a `Duration`.
    pub fn chunk_ttl(&self) -> Duration {
        Duration::from_secs(self.chunk_ttl_secs)
    }
}

fn default_chunk_ttl_secs() -> u64 {
    3600
}

/// Configuration for conversation history recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages recalled for a one-on-one conversation.
    #[serde(default = "default_private_limit")]
    pub private_limit: usize,
    /// Messages recalled for a group conversation.
    #[serde(default = "default_group_limit")]
    pub group_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            private_limit: default_private_limit(),
            group_limit: default_group_limit(),
        }
    }
}

fn default_private_limit() -> usize {
    20
}

fn default_group_limit() -> usize {
    30
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Socket address string in `host:port` form.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Persistence settings for the conversation log and history.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Directory for JSONL files. When unset, everything stays in memory.
    #[serde(default)]
    pub path: Option<String>,
}
