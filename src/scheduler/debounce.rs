//! Debouncing of deferred actions.
//!
//! Calls that arrive within `duration` of each other collapse into a single
//! execution of the most recent action. A superseded call settles with
//! [`RequestError::DebounceCancelled`] instead of hanging.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::clock::{SharedScheduler, TimerHandle};
use super::{await_waiting, rejected, spawn_action, FetchFuture, Waiting};
use crate::error::RequestError;

/// Configuration for a [`Debouncer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceConfig {
    pub duration: Duration,
    /// Execute the first call of a burst immediately.
    pub leading: bool,
    /// Execute the last call of a burst once the burst is over.
    pub trailing: bool,
    /// Upper bound on how long a parked call may wait, measured from the
    /// first parked call of a burst.
    pub max_wait: Option<Duration>,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(300),
            leading: false,
            trailing: true,
            max_wait: None,
        }
    }
}

impl DebounceConfig {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }
}

struct DebounceState<T> {
    waiting: Option<Waiting<T>>,
    trailing_timer: Option<TimerHandle>,
    max_wait_timer: Option<TimerHandle>,
    leading_fired: bool,
    /// Bumped by every call; a trailing timer only fires for its own call.
    epoch: u64,
    /// Bumped whenever a max-wait timer is armed or discarded.
    burst: u64,
}

impl<T> Default for DebounceState<T> {
    fn default() -> Self {
        Self {
            waiting: None,
            trailing_timer: None,
            max_wait_timer: None,
            leading_fired: false,
            epoch: 0,
            burst: 0,
        }
    }
}

#[derive(Clone, Copy)]
enum Fire {
    Trailing(u64),
    MaxWait(u64),
}

/// Debounces actions producing `T`.
pub struct Debouncer<T> {
    config: DebounceConfig,
    scheduler: SharedScheduler,
    state: Arc<Mutex<DebounceState<T>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(config: DebounceConfig, scheduler: SharedScheduler) -> Self {
        Self {
            config,
            scheduler,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// True while a call is parked waiting for a timer.
    pub fn is_pending(&self) -> bool {
        self.state.lock().waiting.is_some()
    }

    /// Submit an action. State changes happen immediately; the returned
    /// future resolves with the action's result, or with
    /// `DebounceCancelled` if a later call or [`cancel`](Self::cancel)
    /// supersedes it first.
    pub fn call<F>(&self, action: F) -> FetchFuture<T>
    where
        F: FnOnce() -> FetchFuture<T> + Send + 'static,
    {
        let mut state = self.state.lock();
        state.trailing_timer = None;
        if let Some(previous) = state.waiting.take() {
            tracing::trace!("debounce: superseding parked call");
            previous.reject(RequestError::DebounceCancelled);
        }
        state.epoch += 1;

        if self.config.leading && !state.leading_fired {
            state.leading_fired = true;
            self.arm(&mut state);
            drop(state);
            return spawn_action(Box::new(action), RequestError::DebounceCancelled);
        }

        if !self.config.trailing && self.config.max_wait.is_none() {
            // Nothing would ever run this call; keep extending the quiet window.
            self.arm(&mut state);
            return rejected(RequestError::DebounceCancelled);
        }

        let (tx, rx) = oneshot::channel();
        state.waiting = Some(Waiting {
            action: Box::new(action),
            tx,
        });
        self.arm(&mut state);
        drop(state);
        await_waiting(rx, RequestError::DebounceCancelled)
    }

    /// Drop timers and reject any parked call. No-op when idle.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.trailing_timer = None;
        state.max_wait_timer = None;
        state.leading_fired = false;
        state.epoch += 1;
        state.burst += 1;
        if let Some(waiting) = state.waiting.take() {
            waiting.reject(RequestError::DebounceCancelled);
        }
    }

    fn arm(&self, state: &mut DebounceState<T>) {
        let trailing = self.config.trailing;
        let shared = Arc::clone(&self.state);
        let epoch = state.epoch;
        state.trailing_timer = Some(self.scheduler.schedule(
            self.config.duration,
            Box::pin(async move { fire(&shared, Fire::Trailing(epoch), trailing) }),
        ));

        if let Some(max_wait) = self.config.max_wait {
            if state.max_wait_timer.is_none() {
                state.burst += 1;
                let burst = state.burst;
                let shared = Arc::clone(&self.state);
                state.max_wait_timer = Some(self.scheduler.schedule(
                    max_wait,
                    Box::pin(async move { fire(&shared, Fire::MaxWait(burst), trailing) }),
                ));
            }
        }
    }
}

fn fire<T: Send + 'static>(shared: &Mutex<DebounceState<T>>, which: Fire, trailing: bool) {
    let waiting = {
        let mut state = shared.lock();
        match which {
            Fire::Trailing(epoch) => {
                if epoch != state.epoch {
                    return;
                }
                state.trailing_timer = None;
                state.leading_fired = false;
                if trailing {
                    state.max_wait_timer = None;
                    state.burst += 1;
                    state.waiting.take()
                } else {
                    None
                }
            }
            Fire::MaxWait(burst) => {
                if burst != state.burst {
                    return;
                }
                state.max_wait_timer = None;
                state.leading_fired = false;
                state.waiting.take()
            }
        }
    };
    if let Some(waiting) = waiting {
        waiting.execute();
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("config", &self.config)
            .finish()
    }
}
