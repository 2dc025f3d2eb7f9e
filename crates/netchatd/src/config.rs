//! Server configuration.
//!
//! Every field has a default so the server runs with no config file at all;
//! a TOML file overrides individual fields. Unknown fields are rejected to
//! catch typos early.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// What to do when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Suspend the producer until space is available (backpressure).
    Block,
    /// Discard the message and log a warning.
    Drop,
}

/// Configuration for the NetChat daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,

    /// Maximum number of concurrently registered sessions
    pub max_sessions: usize,

    /// Capacity of each broker queue (inbound, outbound, analytics)
    pub queue_capacity: usize,

    /// Messages a user may send per rate window
    pub rate_limit: u32,

    /// Rate-limit window length in seconds
    pub rate_window_secs: u64,

    /// Seconds of inactivity after which a session is evicted
    pub idle_timeout_secs: u64,

    /// How often the idle sweep and stats prune run, in seconds
    pub sweep_interval_secs: u64,

    /// Seconds of inactivity after which disconnected users' stats are pruned
    pub stats_retention_secs: u64,

    /// How often the bot broadcasts a statistics report, in seconds
    pub report_interval_secs: u64,

    /// Maximum chat message length in characters
    pub max_message_len: usize,

    /// Whether the analytics path (stats + commands) is active
    pub analytics_enabled: bool,

    /// Policy when the outbound queue is full
    pub outbound_overflow: OverflowPolicy,

    /// Policy when the analytics queue is full
    pub analytics_overflow: OverflowPolicy,

    /// Server name shown in the welcome line
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 12345,
            max_sessions: 100,
            queue_capacity: 1000,
            rate_limit: 60,
            rate_window_secs: 60,
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
            stats_retention_secs: 900,
            report_interval_secs: 60,
            max_message_len: 1000,
            analytics_enabled: true,
            outbound_overflow: OverflowPolicy::Block,
            analytics_overflow: OverflowPolicy::Drop,
            server_name: "NetChat".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration.
    ///
    /// With no path, or a path that does not exist, the defaults are used
    /// (logged, not an error - matching a fresh install). A present but
    /// malformed file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stats_retention(&self) -> Duration {
        Duration::from_secs(self.stats_retention_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to parse config {path}: {error}")]
    Parse { path: String, error: String },
}
