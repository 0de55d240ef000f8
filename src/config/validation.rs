//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every mapping entry parses into a mapping
//! - Validate value ranges and combinations (TLS material, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ConfigProblem>>
//! - Handler-level checks happen later, against the handler registry

use std::net::SocketAddr;

use thiserror::Error;

use super::schema::{Protocol, ServerConfig};
use crate::error::ValidationError;
use crate::mapping::Mapping;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigProblem {
    #[error("mapping #{index}: {source}")]
    Mapping {
        index: usize,
        source: ValidationError,
    },

    #[error("protocol https requires [server.ssl] cert and key")]
    MissingSsl,

    #[error("http2 requires protocol https")]
    Http2WithoutTls,

    #[error("max-redirect must be at least 1")]
    MaxRedirect,

    #[error("holding-timeout-ms must be greater than 0")]
    HoldingTimeout,

    #[error("unknown log level {0}")]
    LogLevel(String),

    #[error("invalid metrics address {0}")]
    MetricsAddress(String),
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ConfigProblem>> {
    let mut problems = Vec::new();

    for (index, raw) in config.mappings.iter().enumerate() {
        if let Err(source) = Mapping::from_value(raw.clone()) {
            problems.push(ConfigProblem::Mapping { index, source });
        }
    }

    let server = &config.server;
    if server.protocol == Protocol::Https && server.ssl.is_none() {
        problems.push(ConfigProblem::MissingSsl);
    }
    if server.http2 && server.protocol != Protocol::Https {
        problems.push(ConfigProblem::Http2WithoutTls);
    }
    if server.max_redirect == 0 {
        problems.push(ConfigProblem::MaxRedirect);
    }
    if server.holding_timeout_ms == 0 {
        problems.push(ConfigProblem::HoldingTimeout);
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_lowercase().as_str()) {
        problems.push(ConfigProblem::LogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        problems.push(ConfigProblem::MetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}
