//! Telemetry for reqflow.
//!
//! Structured logging setup, fetch spans and metric helpers.

mod logging;
mod metrics;
mod spans;

pub use logging::{build_filter, init_logging, LogConfig, LogError, LogFormat, LOG_ENV};
pub use metrics::{
    describe_metrics, record_cache_event, record_fetch, record_poll_tick, record_retry,
};
pub use spans::{fetch_span, SpanExt};
