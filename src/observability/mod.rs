//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch engine and server emit events:
//!     → logging.rs (structured request log)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Both consumers are plain event bus listeners; the engine knows neither
//! - Request id flows through every log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
