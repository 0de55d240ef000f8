//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Log the request lifecycle from the event bus
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level
//! - Request steps log at debug, or info when verbose

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::events::{Event, EventBus, EventKind};

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("reserve={level},tower_http={level}")));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Subscribe the request logger to the event bus.
pub fn attach(events: &EventBus, verbose: bool) {
    events.subscribe(EventKind::Ready, |event| {
        if let Event::Ready { url, port, http2 } = event {
            tracing::info!(url = %url, port, http2, "Server ready");
        }
        Ok(())
    });

    events.subscribe(EventKind::Incoming, move |event| {
        if let Event::Incoming { request, .. } = event {
            if verbose {
                tracing::info!(request_id = request.id, method = %request.method, url = %request.url, "Incoming");
            } else {
                tracing::debug!(request_id = request.id, method = %request.method, url = %request.url, "Incoming");
            }
        }
        Ok(())
    });

    events.subscribe(EventKind::Redirecting, move |event| {
        if let Event::Redirecting {
            request,
            handler_type,
            redirect,
        } = event
        {
            if verbose {
                tracing::info!(request_id = request.id, handler = %handler_type, redirect = %redirect, "Redirecting");
            } else {
                tracing::debug!(request_id = request.id, handler = %handler_type, redirect = %redirect, "Redirecting");
            }
        }
        Ok(())
    });

    events.subscribe(EventKind::Redirected, |event| {
        if let Event::Redirected {
            request,
            time_spent,
            status_code,
            ..
        } = event
        {
            tracing::info!(
                request_id = request.id,
                method = %request.method,
                url = %request.url,
                status = status_code,
                elapsed_ms = u64::try_from(time_spent.as_millis()).unwrap_or(u64::MAX),
                "Request completed"
            );
        }
        Ok(())
    });

    events.subscribe(EventKind::Error, |event| {
        if let Event::Error { request, reason } = event {
            tracing::error!(
                request_id = request.id,
                method = %request.method,
                url = %request.url,
                reason = %reason,
                "Request failed"
            );
        }
        Ok(())
    });

    events.subscribe(EventKind::Aborted, |event| {
        if let Some(request) = event.request() {
            tracing::warn!(request_id = request.id, url = %request.url, "Request aborted by client");
        }
        Ok(())
    });

    events.subscribe(EventKind::Closed, |event| {
        if let Some(request) = event.request() {
            tracing::warn!(request_id = request.id, url = %request.url, "Connection closed before completion");
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaches_to_lifecycle_events() {
        let events = EventBus::new();
        attach(&events, false);
        for kind in [
            EventKind::Ready,
            EventKind::Incoming,
            EventKind::Redirecting,
            EventKind::Redirected,
            EventKind::Error,
            EventKind::Aborted,
            EventKind::Closed,
        ] {
            assert_eq!(events.listener_count(kind), 1, "{kind}");
        }
        assert_eq!(events.listener_count(EventKind::Created), 0);
    }
}
