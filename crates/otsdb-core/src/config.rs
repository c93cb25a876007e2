//! Client configuration.
//!
//! TSD address, transport timeouts, batching/retry policy and query defaults.
//! Loaded from a JSON file by [`crate::config_file`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TSD connection settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Write path (batching + retry)
    #[serde(default)]
    pub write: WriteConfig,
    /// Query defaults
    #[serde(default)]
    pub query: QueryConfig,
}

impl ClientConfig {
    /// Reject values the transports and the retry controller cannot work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.server.host.trim().is_empty() {
            return Err(CoreError::validation("server.host", "must not be empty"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(CoreError::validation(
                "server.request_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.server.connect_timeout_ms == 0 {
            return Err(CoreError::validation(
                "server.connect_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.write.batch_size == 0 {
            return Err(CoreError::validation(
                "write.batch_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ============================================================
// Server
// ============================================================

/// TSD connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TSD host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// TSD port (HTTP API and telnet share it)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connect timeout (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ServerConfig {
    /// Base URL of the HTTP API, e.g. `http://localhost:4242`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Address for the telnet-style line protocol
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

// ============================================================
// Write path
// ============================================================

/// Batching and retry policy for `put`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Maximum points per request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum submission rounds (0 = never submit)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second round, doubled each round (0 = no delay)
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Upper bound for the doubled delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Ask the TSD for per-point error details and keep per-batch reports
    #[serde(default = "default_true")]
    pub details: bool,
}

impl WriteConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: 0,
            max_backoff_ms: default_max_backoff_ms(),
            details: true,
        }
    }
}

// ============================================================
// Query
// ============================================================

/// Query defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Start time used when a query does not name one
    #[serde(default = "default_start")]
    pub default_start: String,
    /// Aggregator used when a query does not name one
    #[serde(default = "default_aggregator")]
    pub default_aggregator: String,
    /// Check aggregators against `/api/aggregators` before querying
    #[serde(default = "default_true")]
    pub validate_aggregators: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_start: default_start(),
            default_aggregator: default_aggregator(),
            validate_aggregators: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4242
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_batch_size() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_start() -> String {
    "1h-ago".to_string()
}

fn default_aggregator() -> String {
    "sum".to_string()
}
