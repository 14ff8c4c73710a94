//! Request orchestration.
//!
//! A [`RequestOrchestrator`] owns the lifecycle of one logical request
//! stream: key derivation, supersession, cancellation, cache reads and writes,
//! retry, rate limiting, polling and focus/reconnect refresh. Only the result
//! of the most recently triggered key is ever reflected in its
//! [`RequestState`].

mod fetch;
mod options;
mod orchestrator;
mod polling;
mod service;
mod signals;
mod state;

pub use options::{
    BeforeHook, DataMerger, ErrorHook, FinallyHook, HasMoreFn, KeyFn, LoadMoreParamsFn,
    PollingOptions, RequestHooks, RequestOptions, RetryHook, SuccessHook, DEFAULT_FETCH_KEY,
};
pub use orchestrator::{OrchestratorBuilder, RequestOrchestrator};
pub use service::{service_fn, Service, ServiceFn};
pub use state::RequestState;

/// Bounds required of request params.
pub trait Params: Clone + Send + Sync + 'static {}
impl<P: Clone + Send + Sync + 'static> Params for P {}

/// Bounds required of response data.
pub trait Data: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Data for T {}
