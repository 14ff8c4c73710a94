//! Shared helpers for integration tests. All tests run on tokio's paused clock.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqflow_core::error::{RequestError, ServiceError};
use reqflow_core::request::{service_fn, Service};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Sleep on the paused clock.
pub async fn advance(millis: u64) {
    tokio::time::sleep(ms(millis)).await;
}

/// Sleep until `millis` after `start`.
pub async fn advance_to(start: Instant, millis: u64) {
    tokio::time::sleep_until(start + ms(millis)).await;
}

/// Timer firing is rounded to the millisecond; allow a small slack.
pub fn assert_elapsed(actual: Duration, expected_ms: u64) {
    let expected = ms(expected_ms);
    assert!(
        actual >= expected && actual <= expected + ms(10),
        "expected ~{expected:?}, got {actual:?}"
    );
}

/// Call counter shared with a test service.
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicU32>);

impl Calls {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment and return the new count.
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Service answering `v{params}` after `delay`, ignoring its token.
pub fn echo_service(calls: Calls, delay: Duration) -> impl Service<u32, String> {
    service_fn(move |params: u32, _cancel: CancellationToken| {
        let calls = calls.clone();
        async move {
            calls.bump();
            tokio::time::sleep(delay).await;
            Ok::<_, RequestError>(format!("v{params}"))
        }
    })
}

/// Service answering `v{params}` after `delay_for(params)`, aborting with a
/// transport cancel when its token fires.
pub fn cancellable_service(
    calls: Calls,
    delay_for: fn(u32) -> Duration,
) -> impl Service<u32, String> {
    service_fn(move |params: u32, cancel: CancellationToken| {
        let calls = calls.clone();
        async move {
            calls.bump();
            tokio::select! {
                () = cancel.cancelled() => Err(RequestError::from(ServiceError::cancelled())),
                () = tokio::time::sleep(delay_for(params)) => Ok(format!("v{params}")),
            }
        }
    })
}

/// Service answering `v{params}-{call number}` after `delay`.
pub fn versioned_service(calls: Calls, delay: Duration) -> impl Service<u32, String> {
    service_fn(move |params: u32, _cancel: CancellationToken| {
        let calls = calls.clone();
        async move {
            let n = calls.bump();
            tokio::time::sleep(delay).await;
            Ok::<_, RequestError>(format!("v{params}-{n}"))
        }
    })
}

/// Service failing with `status` on every call for which `fails(call)` holds.
pub fn flaky_service(
    calls: Calls,
    fails: fn(u32) -> bool,
    status: u16,
) -> impl Service<u32, String> {
    service_fn(move |params: u32, _cancel: CancellationToken| {
        let calls = calls.clone();
        async move {
            let n = calls.bump();
            if fails(n) {
                Err(RequestError::from(ServiceError::status(status, "upstream failed")))
            } else {
                Ok(format!("v{params}"))
            }
        }
    })
}
