//! In-flight request tracking.
//!
//! # Responsibilities
//! - Assign monotonic request ids
//! - Index every in-flight request for the holding protocol
//! - Gate admission of new requests while mappings are being replaced
//!
//! # Request phases
//! ```text
//! Pending  → Active      admitted, reads the mapping table
//! Active   → Pending     admission gate raised, waiting to be readmitted
//! Active   → Excluded    matched a mapping flagged exclude-from-holding-list
//! Active   → Done        completed, aborted or closed
//! ```
//!
//! # Design Decisions
//! - A request publishes `Active` before it checks the gate, and
//!   `set_mappings` raises the gate before it snapshots phases, so every
//!   request is either waited on or held at the gate
//! - Phases and the gate are `watch` channels: waiters never poll

pub mod holding;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use axum::http::Method;
use dashmap::DashMap;
use tokio::sync::watch;

pub use holding::{set_mappings, ContextReport, ContextState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Active,
    Excluded,
    Done,
}

/// How a tracked request left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Response sent with this status.
    Status(u16),
    /// Client gone before the response head.
    Aborted,
    /// Client gone mid-body, or the response was never finished.
    Closed,
}

/// Registry entry for one in-flight request.
#[derive(Debug)]
pub struct TrackedRequest {
    id: u64,
    method: Method,
    url: String,
    started: Instant,
    phase: watch::Sender<Phase>,
    ending: OnceLock<Ending>,
}

impl TrackedRequest {
    fn new(id: u64, method: Method, url: String) -> Self {
        let (phase, _) = watch::channel(Phase::Pending);
        Self {
            id,
            method,
            url,
            started: Instant::now(),
            phase,
            ending: OnceLock::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    /// Stop counting this request in the holding list.
    pub fn mark_excluded(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Active {
                *phase = Phase::Excluded;
                true
            } else {
                false
            }
        });
    }

    /// Record how the request ended. Only the first ending sticks.
    pub(crate) fn finish(&self, ending: Ending) {
        let _ = self.ending.set(ending);
        self.set_phase(Phase::Done);
    }

    pub fn ending(&self) -> Option<Ending> {
        self.ending.get().copied()
    }

    /// Status the response was sent with, once finished.
    pub fn status(&self) -> Option<u16> {
        match self.ending()? {
            Ending::Status(status) => Some(status),
            Ending::Aborted | Ending::Closed => None,
        }
    }

    /// Resolves once the request no longer holds the mapping table.
    pub fn until_released(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut phase = self.phase.subscribe();
        async move {
            // A dropped sender means the request is gone.
            let _ = phase.wait_for(|phase| *phase != Phase::Active).await;
        }
    }
}

/// Index of in-flight requests plus the admission gate.
#[derive(Debug)]
pub struct RequestRegistry {
    contexts: DashMap<u64, Arc<TrackedRequest>>,
    /// Number of mapping updates in progress.
    gate: watch::Sender<usize>,
    next_id: AtomicU64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(0);
        Self {
            contexts: DashMap::new(),
            gate,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new request. It starts `Pending`, see [`Self::await_admission`].
    pub fn open(&self, method: Method, url: &str) -> Arc<TrackedRequest> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tracked = Arc::new(TrackedRequest::new(id, method, url.to_string()));
        self.contexts.insert(id, tracked.clone());
        tracked
    }

    pub fn remove(&self, id: u64) -> Option<Arc<TrackedRequest>> {
        self.contexts.remove(&id).map(|(_, tracked)| tracked)
    }

    pub fn get(&self, id: u64) -> Option<Arc<TrackedRequest>> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Current in-flight requests, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<TrackedRequest>> {
        let mut contexts: Vec<_> = self
            .contexts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        contexts.sort_by_key(|tracked| tracked.id());
        contexts
    }

    /// Wait until no mapping update is in progress, leaving the request `Active`.
    pub async fn await_admission(&self, tracked: &TrackedRequest) {
        loop {
            tracked.set_phase(Phase::Active);
            if *self.gate.borrow() == 0 {
                return;
            }
            tracked.set_phase(Phase::Pending);
            tracing::debug!(request_id = tracked.id(), "Request held during mapping update");
            let mut gate = self.gate.subscribe();
            // The sender lives as long as the registry.
            let _ = gate.wait_for(|paused| *paused == 0).await;
        }
    }

    /// Hold new requests until the returned pause is dropped.
    pub fn pause_admission(&self) -> AdmissionPause<'_> {
        self.gate.send_modify(|paused| *paused += 1);
        AdmissionPause { gate: &self.gate }
    }

    pub fn is_paused(&self) -> bool {
        *self.gate.borrow() > 0
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Admission gate raised for the lifetime of the value.
#[must_use]
#[derive(Debug)]
pub struct AdmissionPause<'a> {
    gate: &'a watch::Sender<usize>,
}

impl Drop for AdmissionPause<'_> {
    fn drop(&mut self) {
        self.gate.send_modify(|paused| *paused = paused.saturating_sub(1));
    }
}
