//! Error types shared across the dispatch engine.
//!
//! Validation errors are fatal at check time. Handler and dispatch errors are
//! per-request and always resolve to a status code. Reconfiguration errors
//! are reported to the caller of `set_mappings` only.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::registry::ContextReport;

/// A mapping or handler failed validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid match specification: {0}")]
    InvalidMatch(String),

    #[error("invalid method specification: {0}")]
    InvalidMethod(String),

    #[error("no method allowed for handler {handler}: {requested}")]
    NoAllowedMethod { handler: String, requested: String },

    #[error("invalid value for {property}: expected {expected}")]
    InvalidType { property: String, expected: String },

    #[error("missing required property {0}")]
    MissingProperty(String),

    #[error("unknown handler for mapping")]
    UnknownHandler,

    #[error("{handler}: {message}")]
    Handler { handler: String, message: String },

    #[error("invalid mapping: {0}")]
    Malformed(String),
}

/// Failure raised by a handler or an `if-match` predicate.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Intended status code for the failure.
    #[error("status {0}")]
    Status(u16),

    #[error("response already started")]
    HeadersSent,

    #[error("response already ended")]
    Ended,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Reasons a dispatch ends up on the error path.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler for the request")]
    NoMapping,

    #[error("loop detected after {0} redirections")]
    LoopDetected(usize),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Status code sent to the client for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::NoMapping => StatusCode::NOT_IMPLEMENTED.as_u16(),
            DispatchError::LoopDetected(_) => StatusCode::LOOP_DETECTED.as_u16(),
            DispatchError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            DispatchError::Handler(HandlerError::Status(code)) => *code,
            DispatchError::Handler(HandlerError::Upstream(_)) => StatusCode::BAD_GATEWAY.as_u16(),
            DispatchError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// `set_mappings` could not complete.
#[derive(Debug, Error)]
pub enum SetMappingsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// In-flight requests did not complete before the timeout.
    #[error("mapping update blocked for {timeout:?} by {} pending request(s)", blocking_count(.report))]
    Blocked {
        timeout: Duration,
        report: Vec<ContextReport>,
    },
}

impl SetMappingsError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, SetMappingsError::Blocked { .. })
    }
}

fn blocking_count(report: &[ContextReport]) -> usize {
    report.iter().filter(|row| row.is_blocking()).count()
}

/// Event bus setup failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
}

/// A listener reported a failure while handling an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
