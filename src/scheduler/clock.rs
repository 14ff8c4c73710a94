//! Timer abstraction shared by the rate limiters, the poller and the retry loop.
//!
//! Production code runs on [`TokioScheduler`]; tests drive the same code on
//! tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Source of time and delayed execution.
pub trait Scheduler: Send + Sync + 'static {
    /// Current instant on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Future that completes after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Run `task` once `delay` has elapsed, unless the returned handle is
    /// cancelled (or dropped) first.
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let token = CancellationToken::new();
        let guard = token.clone();
        let sleep = self.sleep(delay);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = guard.cancelled() => {}
                () = sleep => task.await,
            }
        });
        TimerHandle { token }
    }
}

/// Shared scheduler handle.
pub type SharedScheduler = Arc<dyn Scheduler>;

/// Scheduler backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Scheduler used when the caller does not inject one.
pub fn default_scheduler() -> SharedScheduler {
    Arc::new(TokioScheduler)
}

/// Handle to a scheduled task. Dropping the handle cancels the timer.
///
/// Cancellation only prevents a task that has not started yet; a task whose
/// delay already elapsed runs to completion.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
