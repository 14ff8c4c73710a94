//! The request orchestrator handle and its shared state.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::options::{validate_limiters, PollingOptions, RequestOptions, DEFAULT_FETCH_KEY};
use super::polling::PollingSlot;
use super::service::Service;
use super::signals::Signals;
use super::state::RequestState;
use super::{Data, Params};
use crate::cache::RequestCache;
use crate::error::{ErrorClass, RequestError};
use crate::scheduler::{
    default_scheduler, rejected, DebounceConfig, Debouncer, FetchFuture, PollingState,
    RetryConfig, RetryExecutor, SharedScheduler, ThrottleConfig, Throttler, TimerHandle,
};

/// Rate limiter currently wrapping fetches.
pub(super) enum Limiter<T> {
    Off,
    Debounce(Arc<Debouncer<T>>),
    Throttle(Arc<Throttler<T>>),
}

impl<T> Clone for Limiter<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Off => Self::Off,
            Self::Debounce(d) => Self::Debounce(Arc::clone(d)),
            Self::Throttle(t) => Self::Throttle(Arc::clone(t)),
        }
    }
}

impl<T: Send + 'static> Limiter<T> {
    fn build(
        debounce: Option<DebounceConfig>,
        throttle: Option<ThrottleConfig>,
        scheduler: &SharedScheduler,
    ) -> Self {
        match (debounce, throttle) {
            (Some(config), _) => Self::Debounce(Arc::new(Debouncer::new(
                config,
                Arc::clone(scheduler),
            ))),
            (None, Some(config)) => Self::Throttle(Arc::new(Throttler::new(
                config,
                Arc::clone(scheduler),
            ))),
            (None, None) => Self::Off,
        }
    }

    fn cancel(&self) {
        match self {
            Self::Off => {}
            Self::Debounce(d) => d.cancel(),
            Self::Throttle(t) => t.cancel(),
        }
    }
}

/// Per-key request bookkeeping.
pub(super) struct Bookkeeping<P> {
    pub(super) cancel_tokens: HashMap<String, CancellationToken>,
    pub(super) request_counts: HashMap<String, u64>,
    pub(super) last_params: HashMap<String, P>,
    pub(super) active_key: Option<String>,
    /// Source of every fetch's counter; mirrored into `RequestState::request_count`.
    pub(super) total_requests: u64,
    pub(super) has_completed: bool,
    pub(super) loading_epoch: u64,
    pub(super) loading_timer: Option<TimerHandle>,
}

impl<P: Clone> Bookkeeping<P> {
    fn new() -> Self {
        Self {
            cancel_tokens: HashMap::new(),
            request_counts: HashMap::new(),
            last_params: HashMap::new(),
            active_key: None,
            total_requests: 0,
            has_completed: false,
            loading_epoch: 0,
            loading_timer: None,
        }
    }

    /// Active key and the params it last ran with.
    pub(super) fn active_params(&self) -> Option<(String, P)> {
        let key = self.active_key.as_ref()?;
        let params = self.last_params.get(key)?;
        Some((key.clone(), params.clone()))
    }

    /// Invalidate any pending loading-delay timer.
    pub(super) fn stop_loading_timer(&mut self) {
        self.loading_epoch += 1;
        self.loading_timer = None;
    }
}

pub(super) struct Inner<P, T> {
    pub(super) id: Uuid,
    pub(super) service: Arc<dyn Service<P, T>>,
    pub(super) options: RequestOptions<P, T>,
    pub(super) scheduler: SharedScheduler,
    pub(super) cache: Arc<RequestCache<T>>,
    pub(super) retry: Option<Arc<RetryExecutor>>,
    pub(super) state_tx: watch::Sender<RequestState<P, T>>,
    pub(super) book: Mutex<Bookkeeping<P>>,
    pub(super) limiter: Mutex<Limiter<T>>,
    pub(super) polling: Mutex<PollingSlot<T>>,
    pub(super) signals: Mutex<Signals>,
    pub(super) ready: AtomicBool,
    pub(super) started: AtomicBool,
    pub(super) disposed: AtomicBool,
    /// Cancelled on dispose; stops background listeners.
    pub(super) lifecycle: CancellationToken,
}

impl<P: Params, T: Data> Inner<P, T> {
    pub(super) fn key_for(&self, params: &P) -> String {
        match &self.options.fetch_key {
            Some(f) => f(params),
            None => DEFAULT_FETCH_KEY.to_owned(),
        }
    }

    pub(super) fn classify(&self, err: &RequestError) -> ErrorClass {
        match &self.options.error_classifier {
            Some(classifier) => classifier(err),
            None => err.class(),
        }
    }

    pub(super) fn is_cancellation(&self, err: &RequestError) -> bool {
        self.classify(err) == ErrorClass::Cancellation
    }

    pub(super) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(super) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether `count` is the newest fetch of the active key.
    pub(super) fn is_latest(&self, book: &Bookkeeping<P>, key: &str, count: u64) -> bool {
        !self.is_disposed()
            && book.request_counts.get(key) == Some(&count)
            && book.active_key.as_deref() == Some(key)
    }

    /// Whether the fetch tagged `count` may still touch visible state.
    pub(super) fn is_current(
        &self,
        book: &Bookkeeping<P>,
        key: &str,
        count: u64,
        token: &CancellationToken,
    ) -> bool {
        !token.is_cancelled() && self.is_latest(book, key, count)
    }

    pub(super) fn publish(&self, update: impl FnOnce(&mut RequestState<P, T>)) {
        self.state_tx.send_modify(update);
    }

    /// Route a fetch through the configured rate limiter.
    pub(super) fn dispatch(
        self: &Arc<Self>,
        key: String,
        params: P,
        is_load_more: bool,
    ) -> FetchFuture<T> {
        if self.is_disposed() {
            return rejected(RequestError::Cancelled);
        }
        let inner = Arc::clone(self);
        let action = move || inner.fetch(key, params, is_load_more);
        let limiter = self.limiter.lock().clone();
        match limiter {
            Limiter::Off => action(),
            Limiter::Debounce(debouncer) => debouncer.call(action),
            Limiter::Throttle(throttler) => throttler.call(action, None),
        }
    }

    /// Run a fetch in the background; failures are only visible through
    /// state and hooks.
    pub(super) fn spawn_detached(&self, future: FetchFuture<T>, operation: &'static str) {
        tokio::spawn(async move {
            if let Err(err) = future.await {
                tracing::debug!(operation, error = %err, "detached request ended with error");
            }
        });
    }

    pub(super) fn refresh_target(&self) -> Result<(String, P), RequestError> {
        self.book
            .lock()
            .active_params()
            .ok_or(RequestError::NoPreviousParams)
    }

    /// Automatic run with the default params, if any.
    pub(super) fn run_default(self: &Arc<Self>) {
        let Some(params) = self.options.default_params.clone() else {
            tracing::debug!(orchestrator = %self.id, "no default params; skipping automatic run");
            return;
        };
        let key = self.key_for(&params);
        let future = self.dispatch(key, params, false);
        self.spawn_detached(future, "auto_run");
    }

    fn cancel_active(&self) {
        {
            let mut book = self.book.lock();
            if let Some(key) = &book.active_key {
                if let Some(token) = book.cancel_tokens.get(key) {
                    token.cancel();
                }
            }
            book.stop_loading_timer();
            self.publish(|state| {
                state.loading = false;
                state.loading_more = false;
            });
        }
        let limiter = self.limiter.lock().clone();
        limiter.cancel();
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifecycle.cancel();
        {
            let mut book = self.book.lock();
            for token in book.cancel_tokens.values() {
                token.cancel();
            }
            book.stop_loading_timer();
        }
        let limiter = self.limiter.lock().clone();
        limiter.cancel();
        if let Some(retry) = &self.retry {
            retry.cancel();
        }
        self.dispose_polling();
        self.publish(|state| {
            state.loading = false;
            state.loading_more = false;
        });
        tracing::debug!(orchestrator = %self.id, "orchestrator disposed");
    }
}

/// Builder for a [`RequestOrchestrator`].
pub struct OrchestratorBuilder<P, T> {
    service: Arc<dyn Service<P, T>>,
    options: RequestOptions<P, T>,
    cache: Option<Arc<RequestCache<T>>>,
    scheduler: Option<SharedScheduler>,
}

impl<P: Params, T: Data> OrchestratorBuilder<P, T> {
    pub fn new(service: impl Service<P, T>) -> Self {
        Self {
            service: Arc::new(service),
            options: RequestOptions::default(),
            cache: None,
            scheduler: None,
        }
    }

    pub fn options(mut self, options: RequestOptions<P, T>) -> Self {
        self.options = options;
        self
    }

    /// Share `cache` with other orchestrators. Without it each orchestrator
    /// gets a private cache.
    pub fn cache(mut self, cache: Arc<RequestCache<T>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn scheduler(mut self, scheduler: SharedScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<RequestOrchestrator<P, T>, RequestError> {
        let Self {
            service,
            options,
            cache,
            scheduler,
        } = self;
        if let Err(err) = options.validate() {
            tracing::warn!(error = %err, "rejecting orchestrator options");
            return Err(err);
        }

        let scheduler = scheduler.unwrap_or_else(default_scheduler);
        let cache = cache
            .unwrap_or_else(|| Arc::new(RequestCache::with_scheduler(Arc::clone(&scheduler))));
        let retry = (options.retry_count > 0).then(|| {
            let should_retry = match (&options.should_retry, &options.error_classifier) {
                (Some(predicate), _) => Arc::clone(predicate),
                (None, Some(classifier)) => {
                    let classifier = Arc::clone(classifier);
                    Arc::new(move |err: &RequestError| classifier(err) == ErrorClass::Transient)
                        as crate::scheduler::RetryPredicate
                }
                (None, None) => RetryConfig::default().should_retry,
            };
            Arc::new(RetryExecutor::new(
                RetryConfig {
                    max_retries: options.retry_count,
                    retry_interval: options.retry_interval,
                    exponential: options.retry_exponential,
                    should_retry,
                },
                Arc::clone(&scheduler),
            ))
        });
        let limiter = Limiter::build(
            options.debounce.clone(),
            options.throttle.clone(),
            &scheduler,
        );
        let polling = options.polling.clone();
        let (state_tx, _) = watch::channel(RequestState::default());

        let inner = Arc::new(Inner {
            id: Uuid::new_v4(),
            service,
            ready: AtomicBool::new(options.ready),
            options,
            scheduler,
            cache,
            retry,
            state_tx,
            book: Mutex::new(Bookkeeping::new()),
            limiter: Mutex::new(limiter),
            polling: Mutex::new(PollingSlot::default()),
            signals: Mutex::new(Signals::default()),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            lifecycle: CancellationToken::new(),
        });
        inner.install_polling(polling);
        tracing::debug!(orchestrator = %inner.id, "orchestrator created");
        Ok(RequestOrchestrator { inner })
    }
}

/// Orchestrates one logical request stream. Cloning yields another handle to
/// the same orchestrator.
///
/// Hosts call [`start`](Self::start) once wired up and
/// [`dispose`](Self::dispose) when done.
pub struct RequestOrchestrator<P, T> {
    pub(super) inner: Arc<Inner<P, T>>,
}

impl<P, T> Clone for RequestOrchestrator<P, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Params, T: Data> RequestOrchestrator<P, T> {
    pub fn builder(service: impl Service<P, T>) -> OrchestratorBuilder<P, T> {
        OrchestratorBuilder::new(service)
    }

    /// Orchestrator with a private cache on the tokio clock.
    pub fn new(
        service: impl Service<P, T>,
        options: RequestOptions<P, T>,
    ) -> Result<Self, RequestError> {
        Self::builder(service).options(options).build()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current state snapshot.
    pub fn state(&self) -> RequestState<P, T> {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver notified on every state replacement.
    pub fn subscribe(&self) -> watch::Receiver<RequestState<P, T>> {
        self.inner.state_tx.subscribe()
    }

    pub fn cache(&self) -> &Arc<RequestCache<T>> {
        &self.inner.cache
    }

    /// Key of the most recently triggered fetch.
    pub fn active_key(&self) -> Option<String> {
        self.inner.book.lock().active_key.clone()
    }

    /// Fire-and-forget [`run_async`](Self::run_async).
    pub fn run(&self, params: P) {
        let future = self.run_async(params);
        self.inner.spawn_detached(future, "run");
    }

    /// Fetch with `params`.
    ///
    /// Bookkeeping happens before this returns (unless a rate limiter parks
    /// the call); the future yields this call's own result even when it was
    /// discarded from visible state.
    pub fn run_async(&self, params: P) -> FetchFuture<T> {
        let key = self.inner.key_for(&params);
        self.inner.dispatch(key, params, false)
    }

    /// Fire-and-forget [`refresh_async`](Self::refresh_async).
    pub fn refresh(&self) -> Result<(), RequestError> {
        let future = self.refresh_async()?;
        self.inner.spawn_detached(future, "refresh");
        Ok(())
    }

    /// Re-run the active key with its last params.
    pub fn refresh_async(&self) -> Result<FetchFuture<T>, RequestError> {
        let (key, params) = self.inner.refresh_target()?;
        Ok(self.inner.dispatch(key, params, false))
    }

    /// Fire-and-forget [`load_more_async`](Self::load_more_async).
    pub fn load_more(&self) -> Result<(), RequestError> {
        let future = self.load_more_async()?;
        self.inner.spawn_detached(future, "load_more");
        Ok(())
    }

    /// Fetch the next page and merge it into the current data.
    pub fn load_more_async(&self) -> Result<FetchFuture<T>, RequestError> {
        let next_params = self
            .inner
            .options
            .load_more_params
            .clone()
            .ok_or(RequestError::LoadMoreUnavailable)?;
        let (key, last) = self.inner.refresh_target()?;
        let data = self.inner.state_tx.borrow().data.clone();
        let params = next_params(&last, data.as_ref());
        Ok(self.inner.dispatch(key, params, true))
    }

    /// Replace the visible data locally. No network call, no cache write.
    pub fn mutate(&self, updater: impl FnOnce(Option<&T>) -> Option<T>) {
        let current = self.inner.state_tx.borrow().data.clone();
        let next = updater(current.as_ref());
        self.inner.publish(move |state| state.data = next);
    }

    /// Cancel the active key's request and any call parked in a rate limiter.
    pub fn cancel(&self) {
        self.inner.cancel_active();
    }

    pub fn pause_polling(&self) {
        self.inner.pause_polling();
    }

    pub fn resume_polling(&self) {
        self.inner.resume_polling();
    }

    /// State of the polling controller, when polling is configured.
    pub fn polling_state(&self) -> Option<PollingState> {
        self.inner.polling_state()
    }

    /// Perform the automatic first run (unless manual or not ready) and
    /// apply the polling rule. Later calls are no-ops.
    pub fn start(&self) {
        if self.inner.is_disposed() || self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.inner.options.manual && self.inner.is_ready() {
            self.inner.run_default();
        }
        self.inner.sync_polling();
    }

    /// Cancel everything in flight and stop all timers and listeners.
    /// Further fetches settle with `Cancelled`.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Gate automatic runs, dependency refreshes and polling.
    pub fn set_ready(&self, ready: bool) {
        let was_ready = self.inner.ready.swap(ready, Ordering::AcqRel);
        let inner = &self.inner;
        if ready
            && !was_ready
            && !inner.is_disposed()
            && inner.started.load(Ordering::Acquire)
            && !inner.options.manual
            && inner.book.lock().active_key.is_none()
        {
            inner.run_default();
        }
        inner.sync_polling();
    }

    /// Replace the debounce configuration. Fails if a throttle is active.
    pub fn set_debounce(&self, config: Option<DebounceConfig>) -> Result<(), RequestError> {
        let mut limiter = self.inner.limiter.lock();
        let throttle = match &*limiter {
            Limiter::Throttle(t) => Some(t.config().clone()),
            _ => None,
        };
        match config {
            Some(ref config) => validate_limiters(Some(config), throttle.as_ref())?,
            None if throttle.is_some() => return Ok(()),
            None => {}
        }
        let old = std::mem::replace(
            &mut *limiter,
            Limiter::build(config, None, &self.inner.scheduler),
        );
        drop(limiter);
        old.cancel();
        Ok(())
    }

    /// Replace the throttle configuration. Fails if a debounce is active.
    pub fn set_throttle(&self, config: Option<ThrottleConfig>) -> Result<(), RequestError> {
        let mut limiter = self.inner.limiter.lock();
        let debounce = match &*limiter {
            Limiter::Debounce(d) => Some(d.config().clone()),
            _ => None,
        };
        match config {
            Some(ref config) => validate_limiters(debounce.as_ref(), Some(config))?,
            None if debounce.is_some() => return Ok(()),
            None => {}
        }
        let old = std::mem::replace(
            &mut *limiter,
            Limiter::build(None, config, &self.inner.scheduler),
        );
        drop(limiter);
        old.cancel();
        Ok(())
    }

    /// Replace the polling configuration, rebuilding the controller.
    pub fn set_polling(&self, polling: Option<PollingOptions>) -> Result<(), RequestError> {
        if let Some(options) = &polling {
            super::options::validate_polling(options)?;
        }
        self.inner.install_polling(polling);
        self.inner.sync_polling();
        Ok(())
    }

    /// Refresh when `deps` hashes differently from the previous call.
    /// The first call only records the value.
    pub fn set_refresh_deps<D: Hash + ?Sized>(&self, deps: &D) {
        self.inner.deps_changed(deps);
    }

    /// Report a focus change from the host.
    pub fn handle_focus_change(&self, focused: bool) {
        self.inner.focus_changed(focused);
    }

    /// Report a connectivity change from the host.
    pub fn handle_connectivity_change(&self, online: bool) {
        self.inner.connectivity_changed(online);
    }

    /// Feed focus changes from `events` until the stream ends or the
    /// orchestrator is disposed.
    pub fn watch_focus<S>(&self, events: S) -> JoinHandle<()>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        Inner::watch_signal(&self.inner, events, Inner::focus_changed)
    }

    /// Feed connectivity changes from `events` until the stream ends or the
    /// orchestrator is disposed.
    pub fn watch_connectivity<S>(&self, events: S) -> JoinHandle<()>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        Inner::watch_signal(&self.inner, events, Inner::connectivity_changed)
    }
}

impl<P, T> std::fmt::Debug for RequestOrchestrator<P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("id", &self.inner.id)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}
