//! Stale-while-revalidate policy for a single cache key.

use std::sync::Arc;
use std::time::Duration;

use super::store::RequestCache;

/// Applies `cache_time` (hard TTL) and `stale_time` (soft TTL) to one key.
pub struct CacheCoordinator<T> {
    cache: Arc<RequestCache<T>>,
    key: String,
    cache_time: Option<Duration>,
    stale_time: Option<Duration>,
}

impl<T: Clone + Send + Sync + 'static> CacheCoordinator<T> {
    pub fn new(
        cache: Arc<RequestCache<T>>,
        key: impl Into<String>,
        cache_time: Option<Duration>,
        stale_time: Option<Duration>,
    ) -> Self {
        Self {
            cache,
            key: key.into(),
            cache_time,
            stale_time,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached data within `cache_time`, fresh or stale.
    pub fn get_fresh(&self) -> Option<T> {
        self.cache
            .get(&self.key, self.cache_time)
            .map(|entry| entry.data)
    }

    /// Whether a network call is needed.
    ///
    /// Without a live entry: always. With one and no `stale_time`: never.
    /// Otherwise once the entry is older than `stale_time`.
    pub fn should_revalidate(&self) -> bool {
        let Some(entry) = self.cache.get(&self.key, self.cache_time) else {
            return true;
        };
        match self.stale_time {
            None => false,
            Some(stale_time) => self.cache.now().duration_since(entry.timestamp) > stale_time,
        }
    }

    pub fn store(&self, data: T) {
        self.cache.set(self.key.clone(), data);
    }

    pub fn invalidate(&self) {
        self.cache.remove(&self.key);
    }
}
