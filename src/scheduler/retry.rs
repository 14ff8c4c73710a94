//! Bounded retry with optional exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::clock::SharedScheduler;
use super::FetchResult;
use crate::error::{ErrorClass, RequestError};
use crate::telemetry;

/// Decides whether a failed attempt is worth another try.
pub type RetryPredicate = Arc<dyn Fn(&RequestError) -> bool + Send + Sync>;

/// Configuration for a [`RetryExecutor`].
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_interval: Duration,
    /// Double the delay after every retry.
    pub exponential: bool,
    pub should_retry: RetryPredicate,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            exponential: false,
            should_retry: Arc::new(|err| err.class() == ErrorClass::Transient),
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("retry_interval", &self.retry_interval)
            .field("exponential", &self.exponential)
            .finish_non_exhaustive()
    }
}

/// Runs an action until it succeeds, fails permanently, runs out of
/// attempts, or is cancelled.
pub struct RetryExecutor {
    config: RetryConfig,
    scheduler: SharedScheduler,
    cancelled: CancellationToken,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, scheduler: SharedScheduler) -> Self {
        Self {
            config,
            scheduler,
            cancelled: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Stop every running and future `execute` loop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.config.exponential || attempt <= 1 {
            return self.config.retry_interval;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.config.retry_interval.saturating_mul(factor)
    }

    /// Execute `action` with retries.
    ///
    /// Cancellation (via `cancel` or this executor's own [`cancel`](Self::cancel))
    /// yields `RetryCancelled`. Any other terminal failure is returned as the
    /// original error.
    pub async fn execute<T, F, Fut>(
        &self,
        mut action: F,
        cancel: Option<&CancellationToken>,
        on_retry: Option<&(dyn Fn(u32, &RequestError) + Send + Sync)>,
    ) -> FetchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.cancel_requested(cancel) {
                return Err(RequestError::RetryCancelled);
            }

            let err = match action().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if self.cancel_requested(cancel) {
                return Err(RequestError::RetryCancelled);
            }
            if attempt >= self.config.max_retries || !(self.config.should_retry)(&err) {
                return Err(err);
            }

            attempt += 1;
            if let Some(on_retry) = on_retry {
                on_retry(attempt, &err);
            }
            let delay = self.delay_for(attempt);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            telemetry::record_retry(attempt);
            self.wait(delay, cancel).await?;
        }
    }

    fn cancel_requested(&self, cancel: Option<&CancellationToken>) -> bool {
        self.cancelled.is_cancelled() || cancel.is_some_and(CancellationToken::is_cancelled)
    }

    async fn wait(&self, delay: Duration, cancel: Option<&CancellationToken>) -> FetchResult<()> {
        let external = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            () = self.scheduler.sleep(delay) => Ok(()),
            () = self.cancelled.cancelled() => Err(RequestError::RetryCancelled),
            () = external => Err(RequestError::RetryCancelled),
        }
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
