//! Configuration file structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration read from `config.toml`.
///
/// User-facing limits (parallelism, retries, throttle) are not here; they
/// live in the persisted [`crate::db::Settings`] record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerSettings,

    /// Database location
    pub storage: StorageSettings,

    /// Engine tuning
    pub engine: EngineConfig,

    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file; defaults to `downloads.db` in the config directory
    pub database_path: Option<PathBuf>,
}

/// Tuning knobs for the queue manager and its workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transfer: TransferConfig,
    pub retry: RetryConfig,

    /// Delay before re-attempting a store write that failed
    pub store_retry_ms: u64,

    /// How long shutdown waits for workers to acknowledge
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            retry: RetryConfig::default(),
            store_retry_ms: 1000,
            shutdown_grace_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn store_retry(&self) -> Duration {
        Duration::from_millis(self.store_retry_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest slice written (and throttled) at once
    pub chunk_size: usize,

    /// Progress is reported at most this often...
    pub progress_interval_ms: u64,

    /// ...or after this many bytes, whichever comes first
    pub progress_byte_threshold: u64,

    /// Waiting this long for response headers or the next body bytes is a
    /// transient failure
    pub stall_timeout_ms: u64,

    pub connect_timeout_secs: u64,

    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            progress_interval_ms: 500,
            progress_byte_threshold: 1024 * 1024,
            stall_timeout_ms: 30_000,
            connect_timeout_secs: 15,
            user_agent: format!("PhotoDownload/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TransferConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff before the first retry; doubles on each further retry
    pub base_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}
