//! Interval polling state machine.
//!
//! The next tick is scheduled `interval` after the previous tick finished,
//! so slow actions stretch the effective period. Every state transition bumps
//! an epoch; a timer or an in-flight tick from an older epoch never
//! reschedules, which makes `start`/`resume` idempotent.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::clock::{SharedScheduler, TimerHandle};
use super::FetchFuture;
use crate::error::RequestError;
use crate::telemetry;

/// Action invoked on every tick.
pub type PollAction<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// Lifecycle state of a [`PollingController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingState {
    Stopped,
    Running,
    Paused,
}

/// Optional callbacks for a [`PollingController`].
pub struct PollingHooks<T> {
    /// Checked before every tick; `false` skips the tick but keeps polling.
    pub should_poll: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&RequestError) + Send + Sync>>,
}

impl<T> Default for PollingHooks<T> {
    fn default() -> Self {
        Self {
            should_poll: None,
            on_success: None,
            on_error: None,
        }
    }
}

struct Control {
    state: PollingState,
    timer: Option<TimerHandle>,
    epoch: u64,
}

struct PollingInner<T> {
    interval: Duration,
    scheduler: SharedScheduler,
    action: PollAction<T>,
    hooks: PollingHooks<T>,
    control: Mutex<Control>,
}

/// Repeats an action on a fixed interval. Cloning yields another handle to
/// the same controller.
pub struct PollingController<T> {
    inner: Arc<PollingInner<T>>,
}

impl<T> Clone for PollingController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> PollingController<T> {
    pub fn new(
        interval: Duration,
        scheduler: SharedScheduler,
        action: PollAction<T>,
        hooks: PollingHooks<T>,
    ) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                interval,
                scheduler,
                action,
                hooks,
                control: Mutex::new(Control {
                    state: PollingState::Stopped,
                    timer: None,
                    epoch: 0,
                }),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn state(&self) -> PollingState {
        self.inner.control.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == PollingState::Running
    }

    /// Stopped → Running; the first tick fires after one interval.
    pub fn start(&self) {
        let mut control = self.inner.control.lock();
        if control.state != PollingState::Stopped {
            return;
        }
        control.state = PollingState::Running;
        control.epoch += 1;
        self.inner.schedule(&mut control);
    }

    /// Running/Paused → Stopped.
    pub fn stop(&self) {
        let mut control = self.inner.control.lock();
        control.state = PollingState::Stopped;
        control.timer = None;
        control.epoch += 1;
    }

    /// Running → Paused. No-op in any other state.
    pub fn pause(&self) {
        let mut control = self.inner.control.lock();
        if control.state != PollingState::Running {
            return;
        }
        control.state = PollingState::Paused;
        control.timer = None;
        control.epoch += 1;
    }

    /// Paused → Running. No-op in any other state.
    pub fn resume(&self) {
        let mut control = self.inner.control.lock();
        if control.state != PollingState::Paused {
            return;
        }
        control.state = PollingState::Running;
        control.epoch += 1;
        self.inner.schedule(&mut control);
    }

    /// Preempt the pending timer: run the action now, then reschedule a full
    /// interval later. Only acts while Running.
    ///
    /// The tick runs as its own task, so dropping the returned future does
    /// not lose the reschedule.
    pub async fn execute_now(&self) {
        let epoch = {
            let mut control = self.inner.control.lock();
            if control.state != PollingState::Running {
                return;
            }
            control.timer = None;
            control.epoch += 1;
            control.epoch
        };
        let tick = tokio::spawn(Arc::clone(&self.inner).tick(epoch));
        if let Err(err) = tick.await {
            tracing::warn!(error = %err, "polling: preempting tick failed");
        }
    }

    pub fn dispose(&self) {
        self.stop();
    }
}

impl<T: Send + 'static> PollingInner<T> {
    fn schedule(self: &Arc<Self>, control: &mut Control) {
        let epoch = control.epoch;
        let weak: Weak<Self> = Arc::downgrade(self);
        control.timer = Some(self.scheduler.schedule(
            self.interval,
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.tick(epoch).await;
                }
            }),
        ));
    }

    async fn tick(self: Arc<Self>, epoch: u64) {
        {
            let mut control = self.control.lock();
            if control.state != PollingState::Running || control.epoch != epoch {
                return;
            }
            control.timer = None;
        }

        let skip = self.hooks.should_poll.as_ref().is_some_and(|should| !should());
        if skip {
            tracing::trace!("polling: tick skipped");
            telemetry::record_poll_tick("skipped");
        } else {
            match (self.action)().await {
                Ok(value) => {
                    telemetry::record_poll_tick("ok");
                    if let Some(on_success) = &self.hooks.on_success {
                        on_success(&value);
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "polling: tick failed");
                    telemetry::record_poll_tick("error");
                    if let Some(on_error) = &self.hooks.on_error {
                        on_error(&err);
                    }
                }
            }
        }

        let mut control = self.control.lock();
        if control.state == PollingState::Running && control.epoch == epoch {
            self.schedule(&mut control);
        }
    }
}

impl<T> std::fmt::Debug for PollingController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingController")
            .field("interval", &self.inner.interval)
            .field("state", &self.inner.control.lock().state)
            .finish()
    }
}
