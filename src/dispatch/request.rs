//! Transport-side view of an inbound request.
//!
//! # Responsibilities
//! - Expose method, URL, headers and the (single-use) body to handlers
//! - Report whether the client went away before the response started
//!
//! # Design Decisions
//! - The transport state is a `watch` channel driven by a [`TransportGuard`]
//!   that lives with the outgoing response; dropping the guard early is
//!   how an abort or a close is observed

use std::sync::{Mutex, PoisonError};

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request};
use tokio::sync::watch;

/// Where the transport is in delivering the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Response head not yet delivered.
    Pending,
    /// Head delivered, body streaming.
    Streaming,
    /// Body fully delivered.
    Complete,
    /// Client disconnected before the head was delivered.
    Aborted,
    /// Client disconnected while the body was streaming.
    Closed,
}

/// Owned by the transport; reports delivery progress to the request.
#[derive(Debug)]
pub struct TransportGuard {
    state: watch::Sender<TransportState>,
}

impl TransportGuard {
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn mark_streaming(&self) {
        self.state.send_replace(TransportState::Streaming);
    }

    pub fn mark_complete(&self) {
        self.state.send_replace(TransportState::Complete);
    }

    /// Receiver for the current state, usable after the guard is gone.
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        self.state.send_modify(|state| {
            *state = match *state {
                TransportState::Pending => TransportState::Aborted,
                TransportState::Streaming => TransportState::Closed,
                other => other,
            }
        });
    }
}

pub struct IncomingRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Mutex<Option<Body>>,
    transport: watch::Receiver<TransportState>,
}

impl IncomingRequest {
    /// Build a request from parts; `url` is the path and query.
    pub fn new(method: Method, url: &str, headers: HeaderMap, body: Body) -> (Self, TransportGuard) {
        let (state, transport) = watch::channel(TransportState::Pending);
        let request = Self {
            method,
            url: url.to_string(),
            headers,
            body: Mutex::new(Some(body)),
            transport,
        };
        (request, TransportGuard { state })
    }

    pub fn from_http(request: Request<Body>) -> (Self, TransportGuard) {
        let (parts, body) = request.into_parts();
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Self::new(parts.method, url, parts.headers, body)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Take the request body. Only the first caller gets it.
    pub fn take_body(&self) -> Option<Body> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn transport_state(&self) -> TransportState {
        *self.transport.borrow()
    }

    pub fn is_aborted(&self) -> bool {
        self.transport_state() == TransportState::Aborted
    }

    /// The client went away, before or during the response.
    pub fn is_gone(&self) -> bool {
        matches!(
            self.transport_state(),
            TransportState::Aborted | TransportState::Closed
        )
    }
}

impl std::fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("transport", &self.transport_state())
            .finish_non_exhaustive()
    }
}
