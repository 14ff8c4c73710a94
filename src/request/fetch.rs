//! The per-fetch lifecycle.
//!
//! `begin` runs synchronously when a fetch is triggered. Everything after it
//! (dedupe, cache, loading, the service call, publication) runs in the
//! returned future. A result reaches visible state only while its counter is
//! the latest for its key, the key is active and its token is live.

use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::orchestrator::Inner;
use super::{Data, Params};
use crate::cache::CacheCoordinator;
use crate::error::{RequestError, ServiceErrorKind};
use crate::scheduler::{rejected, FetchFuture, FetchResult};
use crate::telemetry::{self, SpanExt};

/// Identity of one fetch.
struct Ticket<P> {
    key: String,
    params: P,
    count: u64,
    token: CancellationToken,
    is_load_more: bool,
    cache_key: Option<String>,
    /// Awaited another fetch's service call instead of making its own.
    joined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ok,
    Cached,
    Error,
    Cancelled,
    Discarded,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Cached => "cached",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Discarded => "discarded",
        }
    }
}

impl<P: Params, T: Data> Inner<P, T> {
    pub(super) fn fetch(self: &Arc<Self>, key: String, params: P, is_load_more: bool) -> FetchFuture<T> {
        if self.is_disposed() {
            return rejected(RequestError::Cancelled);
        }
        let (count, token) = self.begin(&key, &params);
        if !is_load_more {
            if let Some(on_before) = &self.options.hooks.on_before {
                on_before(&params);
            }
        }

        let span = telemetry::fetch_span(self.id, &key, count);
        let cache_key = self.options.cache_key.as_ref().map(|f| f(&params));
        let ticket = Ticket {
            key,
            params,
            count,
            token,
            is_load_more,
            cache_key,
            joined: false,
        };
        let inner = Arc::clone(self);
        Box::pin(
            async move {
                let started = inner.scheduler.now();
                let (result, outcome) = Arc::clone(&inner).complete(ticket).await;
                let latency = inner.scheduler.now().duration_since(started);
                telemetry::record_fetch(outcome.as_str(), latency);
                tracing::Span::current().record_outcome(&result, outcome == Outcome::Discarded);
                result
            }
            .instrument(span),
        )
    }

    /// Claim a new counter and token for `key` and make it the active key.
    fn begin(&self, key: &str, params: &P) -> (u64, CancellationToken) {
        let mut book = self.book.lock();
        book.total_requests += 1;
        let count = book.total_requests;
        book.request_counts.insert(key.to_owned(), count);

        let token = match &self.options.cancel_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        if let Some(previous) = book.cancel_tokens.insert(key.to_owned(), token.clone()) {
            previous.cancel();
        }
        book.last_params.insert(key.to_owned(), params.clone());
        book.active_key = Some(key.to_owned());
        self.publish(|state| state.request_count = count);
        (count, token)
    }

    async fn complete(self: Arc<Self>, mut ticket: Ticket<P>) -> (FetchResult<T>, Outcome) {
        let coordinator = ticket.cache_key.as_ref().map(|key| {
            CacheCoordinator::new(
                Arc::clone(&self.cache),
                key.clone(),
                self.options.cache_time,
                self.options.stale_time,
            )
        });

        // Load-more pages neither join in-flight fetches nor read the cache.
        let pending = match (&ticket.cache_key, ticket.is_load_more) {
            (Some(key), false) => self.cache.get_pending(key),
            _ => None,
        };

        if pending.is_none() && !ticket.is_load_more {
            if let Some(data) = coordinator.as_ref().and_then(CacheCoordinator::get_fresh) {
                let revalidate = coordinator
                    .as_ref()
                    .is_some_and(CacheCoordinator::should_revalidate);
                telemetry::record_cache_event(if revalidate { "stale" } else { "hit" });
                let applied = self.apply_cached(&ticket, &data, revalidate);
                if !revalidate {
                    if applied {
                        self.sync_polling();
                    }
                    return (Ok(data), Outcome::Cached);
                }
            }
        }

        self.enter_loading(&ticket);

        let result = match pending {
            Some(shared) => {
                tracing::debug!(key = %ticket.key, "joining in-flight request");
                telemetry::record_cache_event("dedupe");
                match shared.await {
                    // The owner of the shared call gave up on it; this fetch has not.
                    Err(err) if self.is_cancellation(&err) && !ticket.token.is_cancelled() => {
                        tracing::debug!(key = %ticket.key, "in-flight request abandoned; fetching directly");
                        self.launch(&ticket).await
                    }
                    other => {
                        ticket.joined = true;
                        other
                    }
                }
            }
            None => self.launch(&ticket).await,
        };

        match self.translate_cancel(&ticket, result) {
            Ok(data) => self.finish_success(ticket, data),
            Err(err) => self.finish_failure(ticket, err),
        }
    }

    /// Invoke the service and, when caching, register the call as pending so
    /// concurrent fetches of the same cache key can join it.
    async fn launch(&self, ticket: &Ticket<P>) -> FetchResult<T> {
        let call = self.invoke(ticket.params.clone(), ticket.token.clone());
        match &ticket.cache_key {
            Some(key) => {
                let shared = call.shared();
                self.cache.set_pending(key.clone(), shared.clone());
                shared.await
            }
            None => call.await,
        }
    }

    fn invoke(&self, params: P, token: CancellationToken) -> FetchFuture<T> {
        let service = Arc::clone(&self.service);
        match self.retry.clone() {
            None => Box::pin(async move { service.call(params, token).await }),
            Some(retry) => {
                let on_retry = self.options.hooks.on_retry.clone();
                Box::pin(async move {
                    retry
                        .execute(
                            || service.call(params.clone(), token.clone()),
                            Some(&token),
                            on_retry.as_deref(),
                        )
                        .await
                })
            }
        }
    }

    /// A transport or retry cancel caused by this fetch's own token becomes
    /// `Superseded` or `Cancelled`.
    fn translate_cancel(&self, ticket: &Ticket<P>, result: FetchResult<T>) -> FetchResult<T> {
        let own_cancel = |err: &RequestError| match err {
            RequestError::Service(err) => err.kind() == ServiceErrorKind::Cancelled,
            RequestError::RetryCancelled => true,
            _ => false,
        };
        match result {
            Err(err) if ticket.token.is_cancelled() && own_cancel(&err) => {
                let book = self.book.lock();
                if book.request_counts.get(&ticket.key) == Some(&ticket.count) {
                    Err(RequestError::Cancelled)
                } else {
                    Err(RequestError::Superseded)
                }
            }
            other => other,
        }
    }

    fn apply_cached(&self, ticket: &Ticket<P>, data: &T, revalidate: bool) -> bool {
        let mut book = self.book.lock();
        if !self.is_current(&book, &ticket.key, ticket.count, &ticket.token) {
            return false;
        }
        if !revalidate {
            book.has_completed = true;
            book.stop_loading_timer();
        }
        let data = data.clone();
        let params = ticket.params.clone();
        self.publish(move |state| {
            state.data = Some(data);
            state.error = None;
            state.params = Some(params);
            if !revalidate {
                state.loading = false;
                state.loading_more = false;
            }
        });
        true
    }

    fn enter_loading(self: &Arc<Self>, ticket: &Ticket<P>) {
        let mut book = self.book.lock();
        if !self.is_current(&book, &ticket.key, ticket.count, &ticket.token) {
            return;
        }
        book.stop_loading_timer();

        if ticket.is_load_more {
            self.publish(|state| {
                state.loading_more = true;
                state.error = None;
            });
            return;
        }

        let params = ticket.params.clone();
        match self.options.loading_delay.filter(|delay| !delay.is_zero()) {
            Some(delay) => {
                self.publish(move |state| {
                    state.params = Some(params);
                    state.error = None;
                });
                let epoch = book.loading_epoch;
                let weak = Arc::downgrade(self);
                book.loading_timer = Some(self.scheduler.schedule(
                    delay,
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.show_loading(epoch);
                        }
                    }),
                ));
            }
            None => self.publish(move |state| {
                state.loading = true;
                state.params = Some(params);
                state.error = None;
            }),
        }
    }

    fn show_loading(&self, epoch: u64) {
        let book = self.book.lock();
        if book.loading_epoch == epoch && book.loading_timer.is_some() {
            self.publish(|state| state.loading = true);
        }
    }

    fn finish_success(&self, ticket: Ticket<P>, data: T) -> (FetchResult<T>, Outcome) {
        let merged = if ticket.is_load_more {
            let previous = self.state_tx.borrow().data.clone();
            match &self.options.data_merger {
                Some(merge) => merge(previous.as_ref(), data.clone()),
                None => data.clone(),
            }
        } else {
            data.clone()
        };
        let has_more = self.options.has_more.as_ref().map(|f| f(&merged));

        let applied = {
            let mut book = self.book.lock();
            let current = self.is_current(&book, &ticket.key, ticket.count, &ticket.token);
            if current {
                book.has_completed = true;
                book.stop_loading_timer();
                let published = merged.clone();
                let params = ticket.params.clone();
                self.publish(move |state| {
                    state.loading = false;
                    state.loading_more = false;
                    state.data = Some(published);
                    state.error = None;
                    state.params = Some(params);
                    state.has_more = has_more;
                });
            }
            current
        };

        if !applied {
            tracing::debug!(
                key = %ticket.key,
                request_count = ticket.count,
                "discarding stale result"
            );
            if let (Some(key), false, false) =
                (&ticket.cache_key, ticket.is_load_more, ticket.joined)
            {
                self.cache.set(key.clone(), data.clone());
            }
            return (Ok(data), Outcome::Discarded);
        }

        // Hooks and cache writes belong to the fetch that made the call.
        if ticket.joined {
            self.sync_polling();
            return (Ok(merged), Outcome::Ok);
        }

        let hooks = &self.options.hooks;
        if let Some(on_success) = &hooks.on_success {
            on_success(&merged, &ticket.params);
        }
        if let Some(key) = &ticket.cache_key {
            self.cache.set(key.clone(), merged.clone());
        }
        self.sync_polling();
        if let Some(on_finally) = &hooks.on_finally {
            on_finally(&ticket.params, Some(&merged), None);
        }
        (Ok(merged), Outcome::Ok)
    }

    fn finish_failure(&self, ticket: Ticket<P>, err: RequestError) -> (FetchResult<T>, Outcome) {
        let cancellation = self.is_cancellation(&err);
        let applied = {
            let mut book = self.book.lock();
            let current = self.is_current(&book, &ticket.key, ticket.count, &ticket.token);
            // A latest fetch cancelled through an external token still owns
            // the loading flags it raised.
            let settles = current
                || (cancellation && self.is_latest(&book, &ticket.key, ticket.count));
            if settles {
                book.stop_loading_timer();
                let visible = (current && !cancellation).then(|| err.clone());
                self.publish(move |state| {
                    state.loading = false;
                    state.loading_more = false;
                    if visible.is_some() {
                        state.error = visible;
                    }
                });
            }
            current && !cancellation
        };

        if !applied {
            tracing::debug!(
                key = %ticket.key,
                request_count = ticket.count,
                error = %err,
                "discarding failed request"
            );
            let outcome = if cancellation {
                Outcome::Cancelled
            } else {
                Outcome::Discarded
            };
            return (Err(err), outcome);
        }

        tracing::debug!(key = %ticket.key, error = %err, "request failed");
        if ticket.joined {
            return (Err(err), Outcome::Error);
        }
        let hooks = &self.options.hooks;
        if let Some(on_error) = &hooks.on_error {
            on_error(&err, &ticket.params);
        }
        if let Some(on_finally) = &hooks.on_finally {
            on_finally(&ticket.params, None, Some(&err));
        }
        if let Some(key) = &ticket.cache_key {
            self.cache.remove(key);
        }
        (Err(err), Outcome::Error)
    }
}
