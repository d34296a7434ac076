//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pipeline_route_matches_total` (counter): by outcome (matched, unmatched)
//! - `pipeline_cache_lookups_total` (counter): by outcome (hit, miss, stale)
//! - `pipeline_cache_stores_total` / `pipeline_cache_store_failures_total`
//! - `pipeline_cache_invalidations_total` (counter): by cause
//! - `pipeline_cache_revalidation_failures_total` (counter)
//! - `pipeline_cache_entries` (gauge)
//! - `pipeline_refresh_runs_total` (counter): by outcome
//! - `pipeline_execution_duration_seconds` (histogram): by route
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via configuration

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_route_match(matched: bool) {
    let outcome = if matched { "matched" } else { "unmatched" };
    ::metrics::counter!("pipeline_route_matches_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(outcome: &'static str) {
    ::metrics::counter!("pipeline_cache_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_store() {
    ::metrics::counter!("pipeline_cache_stores_total").increment(1);
}

pub fn record_cache_store_failure() {
    ::metrics::counter!("pipeline_cache_store_failures_total").increment(1);
}

pub fn record_cache_invalidation(cause: &'static str, count: usize) {
    ::metrics::counter!("pipeline_cache_invalidations_total", "cause" => cause).increment(count as u64);
}

pub fn record_revalidation_failure() {
    ::metrics::counter!("pipeline_cache_revalidation_failures_total").increment(1);
}

pub fn record_cache_size(size: usize) {
    ::metrics::gauge!("pipeline_cache_entries").set(size as f64);
}

pub fn record_refresh_run(outcome: &'static str) {
    ::metrics::counter!("pipeline_refresh_runs_total", "outcome" => outcome).increment(1);
}

pub fn record_execution(route: &str, elapsed: Duration) {
    ::metrics::histogram!("pipeline_execution_duration_seconds", "route" => route.to_string())
        .record(elapsed.as_secs_f64());
}
