//! Metric recording through the `metrics` facade.
//!
//! Nothing is exported unless the host installs a recorder.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("reqflow_fetch_total", "Completed fetches by outcome");
    describe_histogram!(
        "reqflow_fetch_duration_seconds",
        Unit::Seconds,
        "Service call latency"
    );
    describe_counter!("reqflow_cache_events_total", "Cache hits, dedupes and expiries");
    describe_counter!("reqflow_retries_total", "Retry attempts");
    describe_counter!("reqflow_poll_ticks_total", "Polling ticks by outcome");
}

/// Record a fetch outcome: `ok`, `cached`, `error`, `cancelled` or `discarded`.
pub fn record_fetch(outcome: &'static str, latency: Duration) {
    counter!("reqflow_fetch_total", "outcome" => outcome).increment(1);
    histogram!("reqflow_fetch_duration_seconds", "outcome" => outcome)
        .record(latency.as_secs_f64());
}

/// Record a cache event: `hit`, `stale`, `dedupe` or `expired`.
pub fn record_cache_event(event: &'static str) {
    counter!("reqflow_cache_events_total", "event" => event).increment(1);
}

pub fn record_retry(attempt: u32) {
    counter!("reqflow_retries_total", "attempt" => attempt.to_string()).increment(1);
}

/// Record a polling tick: `ok`, `error` or `skipped`.
pub fn record_poll_tick(outcome: &'static str) {
    counter!("reqflow_poll_ticks_total", "outcome" => outcome).increment(1);
}
