//! reqflow core
//!
//! Client-side request orchestration: given a service call from params to
//! data, manage invoking it, deduplicating concurrent calls, caching results,
//! retrying failures, polling, and publishing loading/data/error state under
//! debounce or throttle rate limiting.
//!
//! # Layout
//!
//! - [`scheduler`]: debounce, throttle, retry and polling state machines over
//!   an injectable clock.
//! - [`cache`]: keyed TTL store with in-flight dedupe and the
//!   stale-while-revalidate policy.
//! - [`request`]: the orchestrator composing all of the above.
//!
//! # Visibility rule
//!
//! A fetch's result reaches [`request::RequestState`] only if, when it
//! completes, its counter is still the latest for its key, that key is still
//! the active key, and its cancellation token is live. Discarded results are
//! still returned to their direct caller and may still update the cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod request;
pub mod scheduler;
pub mod telemetry;

pub use cache::{hashed_key, CacheCoordinator, CacheEntry, RequestCache};
pub use config::RequestDefaults;
pub use error::{ErrorClass, RequestError, ServiceError, ServiceErrorKind};
pub use request::{
    service_fn, OrchestratorBuilder, PollingOptions, RequestHooks, RequestOptions,
    RequestOrchestrator, RequestState, Service,
};
pub use scheduler::{
    DebounceConfig, Debouncer, FetchFuture, FetchResult, PollingController, PollingState,
    RetryConfig, RetryExecutor, Scheduler, ThrottleConfig, Throttler,
};
