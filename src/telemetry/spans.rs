//! Span helpers for fetch tracing.

use tracing::{info_span, Span};
use uuid::Uuid;

use crate::error::RequestError;

/// Extension trait for recording fetch outcomes on a span.
pub trait SpanExt {
    fn record_outcome<T>(&self, result: &Result<T, RequestError>, discarded: bool);
}

impl SpanExt for Span {
    fn record_outcome<T>(&self, result: &Result<T, RequestError>, discarded: bool) {
        let status = match result {
            Ok(_) if discarded => "discarded",
            Ok(_) => "ok",
            Err(e) if e.is_cancellation() => "cancelled",
            Err(_) if discarded => "discarded",
            Err(_) => "error",
        };
        self.record("status", status);
        if let Err(e) = result {
            self.record("error.message", e.to_string().as_str());
        }
    }
}

/// Span covering one fetch of one orchestrator.
///
/// `status` and `error.message` are filled in by [`SpanExt::record_outcome`].
pub fn fetch_span(orchestrator: Uuid, key: &str, request_count: u64) -> Span {
    info_span!(
        "fetch",
        orchestrator = %orchestrator,
        key = %key,
        request_count,
        status = tracing::field::Empty,
        error.message = tracing::field::Empty,
    )
}
