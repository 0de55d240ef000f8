//! Mapping table replacement with the holding protocol.
//!
//! # Data Flow
//! ```text
//! set_mappings(mappings, origin, timeout)
//!     → check every mapping against the current handlers
//!     → raise the admission gate (new requests wait)
//!     → snapshot in-flight requests, wait for the active ones
//!       (never the caller, never excluded requests)
//!     → all released:  swap the mapping table, lower the gate
//!     → timeout:       lower the gate, log the blocking requests, fail
//! ```
//!
//! # Design Decisions
//! - The wait set is fixed at the snapshot; requests arriving later are
//!   held at the gate and never waited on
//! - The timeout cancels the wait only; blocking requests keep running
//! - The table is swapped before the gate drops so readmitted requests
//!   see the new mappings

use std::fmt;
use std::time::Duration;

use axum::http::Method;
use futures_util::future::join_all;

use super::{Ending, Phase, RequestRegistry, TrackedRequest};
use crate::config::Configuration;
use crate::error::SetMappingsError;
use crate::mapping::{check, MappingSource};
use crate::observability::metrics;

/// Where a tracked request stood when `set_mappings` gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextState {
    /// Finished with this status while the update was waiting.
    Finished(u16),
    /// Client went away before the response head.
    Aborted,
    /// Client went away mid-body, or the response was never finished.
    Closed,
    /// Flagged `exclude-from-holding-list`.
    Excluded,
    /// The request that called `set_mappings`.
    Caller,
    /// Held at the admission gate.
    Waiting,
    /// Still running after this long.
    Running(Duration),
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Finished(status) => write!(f, "{status}"),
            ContextState::Aborted => f.write_str("aborted"),
            ContextState::Closed => f.write_str("closed"),
            ContextState::Excluded => f.write_str("excluded"),
            ContextState::Caller => f.write_str("is the caller"),
            ContextState::Waiting => f.write_str("waiting"),
            ContextState::Running(elapsed) => write!(f, "{} ms", elapsed.as_millis()),
        }
    }
}

/// One row of the blocked-update diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextReport {
    pub id: u64,
    pub method: Method,
    pub url: String,
    pub state: ContextState,
}

impl ContextReport {
    fn of(tracked: &TrackedRequest, origin: Option<u64>) -> Self {
        let state = if Some(tracked.id()) == origin {
            ContextState::Caller
        } else {
            match tracked.phase() {
                Phase::Done => match tracked.ending() {
                    Some(Ending::Status(status)) => ContextState::Finished(status),
                    Some(Ending::Aborted) => ContextState::Aborted,
                    Some(Ending::Closed) | None => ContextState::Closed,
                },
                Phase::Excluded => ContextState::Excluded,
                Phase::Pending => ContextState::Waiting,
                Phase::Active => ContextState::Running(tracked.elapsed()),
            }
        };
        Self {
            id: tracked.id(),
            method: tracked.method().clone(),
            url: tracked.url().to_string(),
            state,
        }
    }

    /// Whether this request prevented the update.
    pub fn is_blocking(&self) -> bool {
        matches!(self.state, ContextState::Running(_))
    }
}

/// Render the report as an aligned table.
pub fn format_report(report: &[ContextReport]) -> String {
    let url_width = report
        .iter()
        .map(|row| row.url.len())
        .max()
        .unwrap_or(0)
        .max(3);
    let mut table = format!("{:>6} {:<7} {:<url_width$} state\n", "id", "method", "url");
    for row in report {
        table.push_str(&format!(
            "{:>6} {:<7} {:<url_width$} {}\n",
            row.id,
            row.method.as_str(),
            row.url,
            row.state
        ));
    }
    table
}

/// Replace the mapping table once no in-flight request still reads it.
pub async fn set_mappings(
    configuration: &Configuration,
    registry: &RequestRegistry,
    mappings: Vec<MappingSource>,
    origin: Option<u64>,
    timeout: Duration,
) -> Result<(), SetMappingsError> {
    let mut checked = Vec::with_capacity(mappings.len());
    for source in mappings {
        match check(configuration, source).await {
            Ok(mapping) => checked.push(mapping),
            Err(e) => {
                metrics::record_set_mappings("invalid");
                return Err(e.into());
            }
        }
    }

    let pause = registry.pause_admission();
    let snapshot = registry.snapshot();
    let holding: Vec<_> = snapshot
        .iter()
        .filter(|tracked| Some(tracked.id()) != origin)
        .map(|tracked| tracked.until_released())
        .collect();

    tracing::debug!(
        in_flight = snapshot.len(),
        origin = ?origin,
        "Waiting for in-flight requests before mapping update"
    );

    if tokio::time::timeout(timeout, join_all(holding)).await.is_ok() {
        let count = checked.len();
        configuration.replace_mappings(checked);
        drop(pause);
        metrics::record_set_mappings("applied");
        tracing::info!(mappings = count, "Mappings updated");
        return Ok(());
    }

    drop(pause);
    let report: Vec<_> = snapshot
        .iter()
        .map(|tracked| ContextReport::of(tracked, origin))
        .collect();
    metrics::record_set_mappings("blocked");
    tracing::error!(
        timeout = ?timeout,
        "Mapping update blocked by in-flight requests\n{}",
        format_report(&report)
    );
    Err(SetMappingsError::Blocked { timeout, report })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u64, url: &str, state: ContextState) -> ContextReport {
        ContextReport {
            id,
            method: Method::GET,
            url: url.into(),
            state,
        }
    }

    #[test]
    fn only_running_rows_block() {
        assert!(row(1, "/", ContextState::Running(Duration::from_millis(5))).is_blocking());
        assert!(!row(1, "/", ContextState::Caller).is_blocking());
        assert!(!row(1, "/", ContextState::Excluded).is_blocking());
        assert!(!row(1, "/", ContextState::Finished(200)).is_blocking());
    }

    #[test]
    fn report_lists_every_request() {
        let table = format_report(&[
            row(1, "/slow", ContextState::Running(Duration::from_millis(1500))),
            row(2, "/reload", ContextState::Caller),
            row(3, "/events", ContextState::Excluded),
            row(4, "/done", ContextState::Finished(404)),
        ]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].contains("/slow") && lines[1].ends_with("1500 ms"));
        assert!(lines[2].ends_with("is the caller"));
        assert!(lines[3].ends_with("excluded"));
        assert!(lines[4].ends_with("404"));
    }

    #[test]
    fn tracked_requests_report_their_phase() {
        let registry = RequestRegistry::new();
        let caller = registry.open(Method::POST, "/reload");
        let done = registry.open(Method::GET, "/done");
        let waiting = registry.open(Method::GET, "/waiting");
        let aborted = registry.open(Method::GET, "/aborted");
        let closed = registry.open(Method::GET, "/closed");
        done.finish(Ending::Status(204));
        aborted.finish(Ending::Aborted);
        closed.finish(Ending::Closed);

        assert_eq!(ContextReport::of(&caller, Some(caller.id())).state, ContextState::Caller);
        assert_eq!(ContextReport::of(&done, None).state, ContextState::Finished(204));
        assert_eq!(ContextReport::of(&waiting, None).state, ContextState::Waiting);
        assert_eq!(ContextReport::of(&aborted, None).state, ContextState::Aborted);
        assert_eq!(ContextReport::of(&closed, None).state, ContextState::Closed);
        assert_eq!(ContextReport::of(&closed, None).state.to_string(), "closed");
    }
}
