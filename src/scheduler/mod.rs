//! Timing primitives for request orchestration.
//!
//! Debounce, throttle, retry-with-backoff and interval polling. Each one is a
//! standalone state machine driven through the [`Scheduler`] trait, so none of
//! them depends on the orchestrator.

mod clock;
mod debounce;
mod polling;
mod retry;
mod throttle;

pub use clock::{default_scheduler, Scheduler, SharedScheduler, TimerHandle, TokioScheduler};
pub use debounce::{DebounceConfig, Debouncer};
pub use polling::{PollAction, PollingController, PollingHooks, PollingState};
pub use retry::{RetryConfig, RetryExecutor, RetryPredicate};
pub use throttle::{ThrottleConfig, Throttler};

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::RequestError;

/// Result of any fetch-like action.
pub type FetchResult<T> = Result<T, RequestError>;

/// Boxed, sendable future yielding a [`FetchResult`].
pub type FetchFuture<T> = BoxFuture<'static, FetchResult<T>>;

/// Deferred action handed to a rate limiter.
pub(crate) type Action<T> = Box<dyn FnOnce() -> FetchFuture<T> + Send>;

/// An action parked until a timer fires, with the channel of its caller.
pub(crate) struct Waiting<T> {
    pub(crate) action: Action<T>,
    pub(crate) tx: oneshot::Sender<FetchResult<T>>,
}

impl<T: Send + 'static> Waiting<T> {
    /// Settle the caller's future with `err` without running the action.
    pub(crate) fn reject(self, err: RequestError) {
        let _ = self.tx.send(Err(err));
    }

    /// Run the action on the runtime and forward its result.
    pub(crate) fn execute(self) {
        let Waiting { action, tx } = self;
        tokio::spawn(async move {
            let result = action().await;
            let _ = tx.send(result);
        });
    }
}

/// Future that settles immediately with `err`.
pub(crate) fn rejected<T: Send + 'static>(err: RequestError) -> FetchFuture<T> {
    Box::pin(futures::future::ready(Err(err)))
}

/// Run `action` right away on the runtime; `on_abort` is reported if the task
/// is lost (panic or runtime shutdown).
pub(crate) fn spawn_action<T: Send + 'static>(
    action: Action<T>,
    on_abort: RequestError,
) -> FetchFuture<T> {
    let handle = tokio::spawn(action());
    Box::pin(async move { handle.await.unwrap_or(Err(on_abort)) })
}

/// Future for a caller parked on a [`Waiting`] entry.
pub(crate) fn await_waiting<T: Send + 'static>(
    rx: oneshot::Receiver<FetchResult<T>>,
    on_drop: RequestError,
) -> FetchFuture<T> {
    Box::pin(async move { rx.await.unwrap_or(Err(on_drop)) })
}
