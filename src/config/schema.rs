//! Configuration schema definitions.
//!
//! This module defines the configuration file structure for the server.
//! All types derive Serde traits; keys are kebab-case and every field has a
//! default so a minimal file only lists its mappings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::mapping::Mapping;

/// Root of a configuration file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Listener and dispatch settings.
    pub server: Settings,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Mappings in priority order, kept as raw data until checked.
    pub mappings: Vec<Value>,
}

impl ServerConfig {
    /// Parse the raw mapping entries.
    pub fn parse_mappings(&self) -> Result<Vec<Mapping>, ValidationError> {
        self.mappings.iter().cloned().map(Mapping::from_value).collect()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Settings visible to the dispatch engine and handlers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Port to listen on, 0 for any free port.
    pub port: u16,

    pub hostname: String,

    pub protocol: Protocol,

    /// Serve HTTP/2 (with TLS only).
    pub http2: bool,

    /// Maximum number of internal redirections per request.
    pub max_redirect: usize,

    /// Default timeout of the holding protocol.
    pub holding_timeout_ms: u64,

    /// Base directory of relative mapping paths.
    pub cwd: PathBuf,

    pub ssl: Option<SslConfig>,
}

impl Settings {
    pub fn holding_timeout(&self) -> Duration {
        Duration::from_millis(self.holding_timeout_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 5000,
            hostname: "127.0.0.1".to_string(),
            protocol: Protocol::Http,
            http2: false,
            max_redirect: 10,
            holding_timeout_ms: 5000,
            cwd: PathBuf::from("."),
            ssl: None,
        }
    }
}

/// TLS material for `protocol = "https"`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SslConfig {
    /// Path to certificate file (PEM).
    pub cert: PathBuf,

    /// Path to private key file (PEM).
    pub key: PathBuf,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log every request step at info level.
    pub verbose: bool,

    /// Do not attach the request logger.
    pub silent: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            verbose: false,
            silent: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
