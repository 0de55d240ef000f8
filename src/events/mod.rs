//! Typed publish/subscribe for server and request lifecycle events.
//!
//! # Data Flow
//! ```text
//! dispatch engine / http server
//!     → EventBus::emit(Event)
//!     → every listener registered for Event::kind()
//!
//! Consumers:
//!     → observability::logging (request log)
//!     → observability::metrics (counters, histograms)
//!     → tests (event recorders)
//! ```
//!
//! # Design Decisions
//! - Closed vocabulary: unknown names fail at registration, never at emit
//! - Listener failures (errors and panics) are absorbed, except for
//!   `created` which must abort startup
//! - `emit` reports how many listeners ran so callers can tell whether an
//!   error was observed by anyone

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use axum::http::{HeaderMap, Method};

use crate::config::Configuration;
use crate::error::{EventError, ListenerError};

/// Event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Ready,
    Incoming,
    Error,
    Redirecting,
    Redirected,
    Aborted,
    Closed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Created,
        EventKind::Ready,
        EventKind::Incoming,
        EventKind::Error,
        EventKind::Redirecting,
        EventKind::Redirected,
        EventKind::Aborted,
        EventKind::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Ready => "ready",
            EventKind::Incoming => "incoming",
            EventKind::Error => "error",
            EventKind::Redirecting => "redirecting",
            EventKind::Redirected => "redirected",
            EventKind::Aborted => "aborted",
            EventKind::Closed => "closed",
        }
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| EventError::UnknownEvent(name.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters shared by every event of one request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub id: u64,
    pub method: Method,
    pub url: String,
    pub start: SystemTime,
}

/// Why a request went down the error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    Status(u16),
    Failure(String),
}

impl ErrorReason {
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorReason::Status(code) => Some(*code),
            ErrorReason::Failure(_) => None,
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Status(code) => write!(f, "{code}"),
            ErrorReason::Failure(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Created {
        configuration: Arc<Configuration>,
    },
    Ready {
        url: String,
        port: u16,
        http2: bool,
    },
    Incoming {
        request: RequestInfo,
        headers: HeaderMap,
    },
    Error {
        request: RequestInfo,
        reason: ErrorReason,
    },
    Redirecting {
        request: RequestInfo,
        handler_type: String,
        redirect: String,
    },
    Redirected {
        request: RequestInfo,
        end: SystemTime,
        time_spent: Duration,
        status_code: u16,
    },
    Aborted {
        request: RequestInfo,
    },
    Closed {
        request: RequestInfo,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Created { .. } => EventKind::Created,
            Event::Ready { .. } => EventKind::Ready,
            Event::Incoming { .. } => EventKind::Incoming,
            Event::Error { .. } => EventKind::Error,
            Event::Redirecting { .. } => EventKind::Redirecting,
            Event::Redirected { .. } => EventKind::Redirected,
            Event::Aborted { .. } => EventKind::Aborted,
            Event::Closed { .. } => EventKind::Closed,
        }
    }

    /// Request parameters, for per-request events.
    pub fn request(&self) -> Option<&RequestInfo> {
        match self {
            Event::Incoming { request, .. }
            | Event::Error { request, .. }
            | Event::Redirecting { request, .. }
            | Event::Redirected { request, .. }
            | Event::Aborted { request }
            | Event::Closed { request } => Some(request),
            Event::Created { .. } | Event::Ready { .. } => None,
        }
    }
}

/// Callback invoked for each emitted event of the kind it registered for.
pub type Listener = Arc<dyn Fn(&Event) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener by event name.
    pub fn on<F>(&self, name: &str, callback: F) -> Result<(), EventError>
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let kind = name.parse()?;
        self.subscribe(kind, callback);
        Ok(())
    }

    /// Register a listener for a known event kind.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke the listeners of the event's kind and return how many ran.
    ///
    /// Only `created` listeners can fail the emission.
    pub fn emit(&self, event: Event) -> Result<usize, ListenerError> {
        let kind = event.kind();
        // Listeners may register other listeners; never call them under the lock.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for listener in &listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(&event)))
                .unwrap_or_else(|_| Err(ListenerError::new("listener panicked")));
            if let Err(err) = result {
                if kind == EventKind::Created {
                    return Err(err);
                }
                tracing::warn!(event = %kind, error = %err, "Event listener failed");
            }
        }
        Ok(listeners.len())
    }

    /// Emit an event whose listener failures cannot propagate.
    pub(crate) fn notify(&self, event: Event) -> usize {
        self.emit(event).unwrap_or(0)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&'static str, usize> = listeners
            .iter()
            .map(|(kind, callbacks)| (kind.as_str(), callbacks.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready() -> Event {
        Event::Ready {
            url: "http://localhost:8080/".into(),
            port: 8080,
            http2: false,
        }
    }

    #[test]
    fn unknown_event_name_fails_registration() {
        let bus = EventBus::new();
        let result = bus.on("finished", |_| Ok(()));
        assert_eq!(result, Err(EventError::UnknownEvent("finished".into())));
    }

    #[test]
    fn emit_returns_listener_count() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            bus.on("ready", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(bus.emit(ready()).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count(EventKind::Error), 0);
    }

    #[test]
    fn failing_listener_is_absorbed() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.on("ready", |_| Err(ListenerError::new("boom"))).unwrap();
        bus.on("ready", |_| panic!("listener panic")).unwrap();
        let counter = calls.clone();
        bus.on("ready", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert_eq!(bus.emit(ready()).unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn created_listener_failure_propagates() {
        let bus = EventBus::new();
        bus.on("created", |_| Err(ListenerError::new("cannot start"))).unwrap();
        let configuration = Arc::new(Configuration::empty());

        let result = bus.emit(Event::Created { configuration });
        assert_eq!(result, Err(ListenerError::new("cannot start")));
    }

    #[test]
    fn event_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }
}
