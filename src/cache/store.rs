//! Keyed result store with lazy TTL expiry and in-flight deduplication.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::Shared;
use tokio::time::Instant;

use crate::scheduler::{default_scheduler, FetchFuture, SharedScheduler};
use crate::telemetry;

/// A cached result. Replaced wholesale on every write.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
}

/// An in-flight fetch that any number of callers can await.
pub type SharedFetch<T> = Shared<FetchFuture<T>>;

struct PendingEntry<T> {
    id: u64,
    future: SharedFetch<T>,
    started_at: Instant,
}

/// Keyed cache of fetch results.
///
/// Expiry is lazy: an entry older than the TTL passed to [`get`](Self::get)
/// is evicted by that read. There is no background sweep and no size bound.
pub struct RequestCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    pending: Arc<DashMap<String, PendingEntry<T>>>,
    next_pending_id: AtomicU64,
    scheduler: SharedScheduler,
}

impl<T: Clone + Send + Sync + 'static> RequestCache<T> {
    pub fn new() -> Self {
        Self::with_scheduler(default_scheduler())
    }

    pub fn with_scheduler(scheduler: SharedScheduler) -> Self {
        Self {
            entries: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            next_pending_id: AtomicU64::new(1),
            scheduler,
        }
    }

    /// Current time on the cache's clock.
    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }

    /// Fetch the entry for `key`, evicting it if older than `ttl`.
    pub fn get(&self, key: &str, ttl: Option<Duration>) -> Option<CacheEntry<T>> {
        let now = self.scheduler.now();
        let expired = |entry: &CacheEntry<T>| {
            ttl.is_some_and(|ttl| now.duration_since(entry.timestamp) > ttl)
        };
        {
            let entry = self.entries.get(key)?;
            if !expired(entry.value()) {
                return Some(entry.value().clone());
            }
        }
        // Re-checked under the shard lock: a concurrent `set` keeps its entry.
        if self.entries.remove_if(key, |_, entry| expired(entry)).is_some() {
            tracing::trace!(key, "cache: entry expired");
            telemetry::record_cache_event("expired");
            return None;
        }
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store `data` under `key`. A completed fetch supersedes any pending
    /// marker for the same key.
    pub fn set(&self, key: impl Into<String>, data: T) {
        let key = key.into();
        self.pending.remove(&key);
        self.entries.insert(
            key,
            CacheEntry {
                data,
                timestamp: self.scheduler.now(),
            },
        );
    }

    pub fn get_pending(&self, key: &str) -> Option<SharedFetch<T>> {
        self.pending.get(key).map(|entry| entry.future.clone())
    }

    pub fn has_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// When the in-flight fetch for `key` was registered.
    pub fn pending_since(&self, key: &str) -> Option<Instant> {
        self.pending.get(key).map(|entry| entry.started_at)
    }

    /// Register an in-flight fetch for `key`.
    ///
    /// The marker is removed once the future settles, but only if it is still
    /// the same marker: a newer `set_pending` for the key is left in place.
    pub fn set_pending(&self, key: impl Into<String>, future: SharedFetch<T>) {
        let key = key.into();
        let id = self.next_pending_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            key.clone(),
            PendingEntry {
                id,
                future: future.clone(),
                started_at: self.scheduler.now(),
            },
        );

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let _ = future.await;
            pending.remove_if(&key, |_, entry| entry.id == id);
        });
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry and pending marker.
    pub fn clear(&self) {
        self.entries.clear();
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for RequestCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RequestCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("entries", &self.entries.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
