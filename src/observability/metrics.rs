//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, redirects, errors)
//! - Expose Prometheus-compatible metrics endpoint
//! - Feed metrics from the event bus
//!
//! # Metrics
//! - `reserve_requests_total` (counter): completed requests by method, status
//! - `reserve_request_duration_seconds` (histogram): latency distribution
//! - `reserve_redirects_total` (counter): handler invocations by handler type
//! - `reserve_errors_total` (counter): requests that took the error path
//! - `reserve_aborted_total` (counter): client disconnects
//! - `reserve_in_flight_requests` (gauge): requests being dispatched
//! - `reserve_set_mappings_total` (counter): mapping updates by outcome
//!
//! # Design Decisions
//! - Without an installed recorder every update is a no-op
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::events::{Event, EventBus, EventKind};

const DURATION_BUCKETS: [f64; 11] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
];

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("reserve_request_duration_seconds".to_string()),
            &DURATION_BUCKETS,
        )?
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Count a `set_mappings` call: `applied`, `blocked` or `invalid`.
pub fn record_set_mappings(outcome: &'static str) {
    metrics::counter!("reserve_set_mappings_total", "outcome" => outcome).increment(1);
}

/// Subscribe the metric recorders to the event bus.
pub fn attach(events: &EventBus) {
    events.subscribe(EventKind::Incoming, |_| {
        metrics::gauge!("reserve_in_flight_requests").increment(1.0);
        Ok(())
    });

    events.subscribe(EventKind::Redirecting, |event| {
        if let Event::Redirecting { handler_type, .. } = event {
            metrics::counter!("reserve_redirects_total", "type" => handler_type.clone()).increment(1);
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
            metrics::counter!(
                "reserve_requests_total",
                "method" => request.method.to_string(),
                "status" => status_code.to_string()
            )
            .increment(1);
            metrics::histogram!("reserve_request_duration_seconds").record(time_spent.as_secs_f64());
        }
        metrics::gauge!("reserve_in_flight_requests").decrement(1.0);
        Ok(())
    });

    events.subscribe(EventKind::Error, |_| {
        metrics::counter!("reserve_errors_total").increment(1);
        Ok(())
    });

    events.subscribe(EventKind::Aborted, |_| {
        metrics::counter!("reserve_aborted_total").increment(1);
        metrics::gauge!("reserve_in_flight_requests").decrement(1.0);
        Ok(())
    });

    events.subscribe(EventKind::Closed, |_| {
        metrics::gauge!("reserve_in_flight_requests").decrement(1.0);
        Ok(())
    });
}
