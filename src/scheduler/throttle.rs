//! Throttling of deferred actions: at most one execution per window.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::clock::{SharedScheduler, TimerHandle};
use super::{await_waiting, rejected, spawn_action, FetchFuture, Waiting};
use crate::error::RequestError;

/// Configuration for a [`Throttler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub duration: Duration,
    pub leading: bool,
    pub trailing: bool,
    /// Force an execution once a window has been open this long.
    pub max_wait: Option<Duration>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(300),
            leading: true,
            trailing: true,
            max_wait: None,
        }
    }
}

impl ThrottleConfig {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }
}

struct ThrottleState<T> {
    last_execution: Option<Instant>,
    window_start: Option<Instant>,
    waiting: Option<Waiting<T>>,
    timer: Option<TimerHandle>,
    epoch: u64,
}

/// Throttles actions producing `T`.
pub struct Throttler<T> {
    config: ThrottleConfig,
    scheduler: SharedScheduler,
    state: Arc<Mutex<ThrottleState<T>>>,
}

impl<T: Send + 'static> Throttler<T> {
    pub fn new(config: ThrottleConfig, scheduler: SharedScheduler) -> Self {
        Self {
            config,
            scheduler,
            state: Arc::new(Mutex::new(ThrottleState {
                last_execution: None,
                window_start: None,
                waiting: None,
                timer: None,
                epoch: 0,
            })),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().waiting.is_some()
    }

    /// Submit an action. `trailing_override` replaces the configured
    /// trailing flag for this call only.
    ///
    /// Calls that are neither eligible for a leading execution nor allowed
    /// to trail settle immediately with `ThrottleCancelled`.
    pub fn call<F>(&self, action: F, trailing_override: Option<bool>) -> FetchFuture<T>
    where
        F: FnOnce() -> FetchFuture<T> + Send + 'static,
    {
        let now = self.scheduler.now();
        let mut state = self.state.lock();
        let window_start = *state.window_start.get_or_insert(now);

        if let Some(max_wait) = self.config.max_wait {
            if now.duration_since(window_start) >= max_wait {
                tracing::trace!("throttle: max wait reached, forcing execution");
                return self.execute_now(state, now, Box::new(action));
            }
        }

        let leading_ready = self.config.leading
            && state
                .last_execution
                .map_or(true, |last| now.duration_since(last) >= self.config.duration);
        if leading_ready {
            return self.execute_now(state, now, Box::new(action));
        }

        if !trailing_override.unwrap_or(self.config.trailing) {
            return rejected(RequestError::ThrottleCancelled);
        }

        if let Some(previous) = state.waiting.take() {
            previous.reject(RequestError::ThrottleCancelled);
        }
        let (tx, rx) = oneshot::channel();
        state.waiting = Some(Waiting {
            action: Box::new(action),
            tx,
        });

        let anchor = state.last_execution.unwrap_or(window_start);
        let remaining = self
            .config
            .duration
            .saturating_sub(now.duration_since(anchor));
        state.epoch += 1;
        let epoch = state.epoch;
        let shared = Arc::clone(&self.state);
        let scheduler = Arc::clone(&self.scheduler);
        state.timer = Some(self.scheduler.schedule(
            remaining,
            Box::pin(async move { fire(&shared, scheduler.now(), epoch) }),
        ));
        drop(state);
        await_waiting(rx, RequestError::ThrottleCancelled)
    }

    /// Drop the trailing call and its timer.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        Self::discard_waiting(&mut state);
    }

    /// Forget the window entirely; the next call is treated as the first.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        Self::discard_waiting(&mut state);
        state.last_execution = None;
        state.window_start = None;
    }

    fn execute_now(
        &self,
        mut state: parking_lot::MutexGuard<'_, ThrottleState<T>>,
        now: Instant,
        action: super::Action<T>,
    ) -> FetchFuture<T> {
        Self::discard_waiting(&mut state);
        state.last_execution = Some(now);
        state.window_start = Some(now);
        drop(state);
        spawn_action(action, RequestError::ThrottleCancelled)
    }

    fn discard_waiting(state: &mut ThrottleState<T>) {
        state.timer = None;
        state.epoch += 1;
        if let Some(waiting) = state.waiting.take() {
            waiting.reject(RequestError::ThrottleCancelled);
        }
    }
}

fn fire<T: Send + 'static>(shared: &Mutex<ThrottleState<T>>, now: Instant, epoch: u64) {
    let waiting = {
        let mut state = shared.lock();
        if state.epoch != epoch {
            return;
        }
        state.timer = None;
        let waiting = state.waiting.take();
        if waiting.is_some() {
            state.last_execution = Some(now);
            state.window_start = Some(now);
        }
        waiting
    };
    if let Some(waiting) = waiting {
        waiting.execute();
    }
}

impl<T> std::fmt::Debug for Throttler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("config", &self.config)
            .finish()
    }
}
