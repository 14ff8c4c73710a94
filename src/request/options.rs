//! Per-orchestrator options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RequestDefaults;
use crate::error::{ErrorClassifier, RequestError};
use crate::scheduler::{DebounceConfig, RetryPredicate, ThrottleConfig};

/// Key used when no `fetch_key` function is configured.
pub const DEFAULT_FETCH_KEY: &str = "_default";

/// Derives a string key from params.
pub type KeyFn<P> = Arc<dyn Fn(&P) -> String + Send + Sync>;

/// Computes the next page's params from the last params and current data.
pub type LoadMoreParamsFn<P, T> = Arc<dyn Fn(&P, Option<&T>) -> P + Send + Sync>;

/// Merges a freshly loaded page into the existing data.
pub type DataMerger<T> = Arc<dyn Fn(Option<&T>, T) -> T + Send + Sync>;

/// Whether more pages are available after `data`.
pub type HasMoreFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

pub type BeforeHook<P> = Arc<dyn Fn(&P) + Send + Sync>;
pub type SuccessHook<P, T> = Arc<dyn Fn(&T, &P) + Send + Sync>;
pub type ErrorHook<P> = Arc<dyn Fn(&RequestError, &P) + Send + Sync>;
pub type FinallyHook<P, T> =
    Arc<dyn Fn(&P, Option<&T>, Option<&RequestError>) + Send + Sync>;
pub type RetryHook = Arc<dyn Fn(u32, &RequestError) + Send + Sync>;

/// Lifecycle callbacks. Cancellation-class failures never reach
/// `on_error` or `on_finally`.
pub struct RequestHooks<P, T> {
    /// Runs when a non-load-more fetch starts.
    pub on_before: Option<BeforeHook<P>>,
    pub on_success: Option<SuccessHook<P, T>>,
    pub on_error: Option<ErrorHook<P>>,
    pub on_finally: Option<FinallyHook<P, T>>,
    pub on_retry: Option<RetryHook>,
}

impl<P, T> Default for RequestHooks<P, T> {
    fn default() -> Self {
        Self {
            on_before: None,
            on_success: None,
            on_error: None,
            on_finally: None,
            on_retry: None,
        }
    }
}

impl<P, T> Clone for RequestHooks<P, T> {
    fn clone(&self) -> Self {
        Self {
            on_before: self.on_before.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_finally: self.on_finally.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingOptions {
    pub interval: Duration,
    /// Pause polling after a failed tick.
    pub pause_on_error: bool,
    /// After a pause on error, try to resume polling this much later.
    pub retry_interval: Option<Duration>,
    /// Keep polling while the host reports focus lost.
    pub when_hidden: bool,
}

impl PollingOptions {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pause_on_error: false,
            retry_interval: None,
            when_hidden: true,
        }
    }

    /// Like [`new`](Self::new), taking the resume delay from `defaults`.
    pub fn from_defaults(interval: Duration, defaults: &RequestDefaults) -> Self {
        Self {
            retry_interval: defaults.polling_retry_interval(),
            ..Self::new(interval)
        }
    }

    pub fn pause_on_error(mut self, retry_interval: Option<Duration>) -> Self {
        self.pause_on_error = true;
        self.retry_interval = retry_interval.or(self.retry_interval);
        self
    }

    pub fn when_hidden(mut self, enabled: bool) -> Self {
        self.when_hidden = enabled;
        self
    }
}

/// Options for a [`RequestOrchestrator`](super::RequestOrchestrator).
pub struct RequestOptions<P, T> {
    /// Skip the automatic first run on `start`.
    pub manual: bool,
    /// While false, automatic runs, dependency refreshes and polling are held.
    pub ready: bool,
    /// Params for the automatic first run.
    pub default_params: Option<P>,
    pub fetch_key: Option<KeyFn<P>>,
    /// Enables caching and in-flight dedupe when set.
    pub cache_key: Option<KeyFn<P>>,
    /// Hard TTL of cache entries.
    pub cache_time: Option<Duration>,
    /// Soft TTL; entries older than this are served and refetched.
    pub stale_time: Option<Duration>,
    pub retry_count: u32,
    pub retry_interval: Duration,
    pub retry_exponential: bool,
    /// Overrides the default "transient errors only" retry rule.
    pub should_retry: Option<RetryPredicate>,
    pub polling: Option<PollingOptions>,
    /// Publish `loading = true` only if a fetch outlasts this delay.
    pub loading_delay: Option<Duration>,
    pub debounce: Option<DebounceConfig>,
    pub throttle: Option<ThrottleConfig>,
    pub load_more_params: Option<LoadMoreParamsFn<P, T>>,
    /// Defaults to replacing the data with the new page.
    pub data_merger: Option<DataMerger<T>>,
    pub has_more: Option<HasMoreFn<T>>,
    pub refresh_on_focus: bool,
    /// Minimum spacing between focus-triggered refreshes.
    pub focus_timespan: Duration,
    pub refresh_on_reconnect: bool,
    /// External token; each fetch token is a child of it.
    pub cancel_token: Option<CancellationToken>,
    pub error_classifier: Option<ErrorClassifier>,
    pub hooks: RequestHooks<P, T>,
}

impl<P, T> Default for RequestOptions<P, T> {
    fn default() -> Self {
        Self::from_defaults(&RequestDefaults::default())
    }
}

impl<P, T> RequestOptions<P, T> {
    /// Options seeded from process-level defaults.
    pub fn from_defaults(defaults: &RequestDefaults) -> Self {
        Self {
            manual: false,
            ready: true,
            default_params: None,
            fetch_key: None,
            cache_key: None,
            cache_time: defaults.cache_time(),
            stale_time: defaults.stale_time(),
            retry_count: defaults.retry_count,
            retry_interval: defaults.retry_interval(),
            retry_exponential: defaults.retry_exponential,
            should_retry: None,
            polling: None,
            loading_delay: defaults.loading_delay(),
            debounce: None,
            throttle: None,
            load_more_params: None,
            data_merger: None,
            has_more: None,
            refresh_on_focus: false,
            focus_timespan: defaults.focus_timespan(),
            refresh_on_reconnect: false,
            cancel_token: None,
            error_classifier: None,
            hooks: RequestHooks::default(),
        }
    }

    /// Reject contradictory settings.
    pub fn validate(&self) -> Result<(), RequestError> {
        validate_limiters(self.debounce.as_ref(), self.throttle.as_ref())?;
        if let Some(polling) = &self.polling {
            validate_polling(polling)?;
        }
        Ok(())
    }

    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn default_params(mut self, params: P) -> Self {
        self.default_params = Some(params);
        self
    }

    pub fn fetch_key(mut self, f: impl Fn(&P) -> String + Send + Sync + 'static) -> Self {
        self.fetch_key = Some(Arc::new(f));
        self
    }

    pub fn cache_key(mut self, f: impl Fn(&P) -> String + Send + Sync + 'static) -> Self {
        self.cache_key = Some(Arc::new(f));
        self
    }

    pub fn cache_time(mut self, ttl: Duration) -> Self {
        self.cache_time = Some(ttl);
        self
    }

    pub fn stale_time(mut self, ttl: Duration) -> Self {
        self.stale_time = Some(ttl);
        self
    }

    /// Retry up to `count` times, `interval` apart (doubling when `exponential`).
    pub fn retry(mut self, count: u32, interval: Duration, exponential: bool) -> Self {
        self.retry_count = count;
        self.retry_interval = interval;
        self.retry_exponential = exponential;
        self
    }

    pub fn should_retry(
        mut self,
        f: impl Fn(&RequestError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(f));
        self
    }

    pub fn polling(mut self, polling: PollingOptions) -> Self {
        self.polling = Some(polling);
        self
    }

    pub fn loading_delay(mut self, delay: Duration) -> Self {
        self.loading_delay = Some(delay);
        self
    }

    pub fn debounce(mut self, config: DebounceConfig) -> Self {
        self.debounce = Some(config);
        self
    }

    pub fn throttle(mut self, config: ThrottleConfig) -> Self {
        self.throttle = Some(config);
        self
    }

    pub fn load_more(
        mut self,
        params: impl Fn(&P, Option<&T>) -> P + Send + Sync + 'static,
        merger: impl Fn(Option<&T>, T) -> T + Send + Sync + 'static,
    ) -> Self {
        self.load_more_params = Some(Arc::new(params));
        self.data_merger = Some(Arc::new(merger));
        self
    }

    pub fn has_more(mut self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.has_more = Some(Arc::new(f));
        self
    }

    pub fn refresh_on_focus(mut self, enabled: bool) -> Self {
        self.refresh_on_focus = enabled;
        self
    }

    pub fn focus_timespan(mut self, timespan: Duration) -> Self {
        self.focus_timespan = timespan;
        self
    }

    pub fn refresh_on_reconnect(mut self, enabled: bool) -> Self {
        self.refresh_on_reconnect = enabled;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn error_classifier(
        mut self,
        f: impl Fn(&RequestError) -> crate::error::ErrorClass + Send + Sync + 'static,
    ) -> Self {
        self.error_classifier = Some(Arc::new(f));
        self
    }

    pub fn hooks(mut self, hooks: RequestHooks<P, T>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_before(mut self, f: impl Fn(&P) + Send + Sync + 'static) -> Self {
        self.hooks.on_before = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&T, &P) + Send + Sync + 'static) -> Self {
        self.hooks.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&RequestError, &P) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_finally(
        mut self,
        f: impl Fn(&P, Option<&T>, Option<&RequestError>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_finally = Some(Arc::new(f));
        self
    }

    pub fn on_retry(mut self, f: impl Fn(u32, &RequestError) + Send + Sync + 'static) -> Self {
        self.hooks.on_retry = Some(Arc::new(f));
        self
    }
}

pub(crate) fn validate_limiters(
    debounce: Option<&DebounceConfig>,
    throttle: Option<&ThrottleConfig>,
) -> Result<(), RequestError> {
    if debounce.is_some() && throttle.is_some() {
        return Err(RequestError::InvalidConfig(
            "debounce and throttle cannot be combined".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_polling(polling: &PollingOptions) -> Result<(), RequestError> {
    if polling.interval.is_zero() {
        return Err(RequestError::InvalidConfig(
            "polling interval must be greater than zero".into(),
        ));
    }
    Ok(())
}

impl<P, T> fmt::Debug for RequestOptions<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("manual", &self.manual)
            .field("ready", &self.ready)
            .field("fetch_key", &self.fetch_key.is_some())
            .field("cache_key", &self.cache_key.is_some())
            .field("cache_time", &self.cache_time)
            .field("stale_time", &self.stale_time)
            .field("retry_count", &self.retry_count)
            .field("retry_interval", &self.retry_interval)
            .field("retry_exponential", &self.retry_exponential)
            .field("polling", &self.polling)
            .field("loading_delay", &self.loading_delay)
            .field("debounce", &self.debounce)
            .field("throttle", &self.throttle)
            .field("refresh_on_focus", &self.refresh_on_focus)
            .field("refresh_on_reconnect", &self.refresh_on_reconnect)
            .finish_non_exhaustive()
    }
}
