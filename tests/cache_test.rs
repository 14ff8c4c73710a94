//! Tests for the request cache and its stale-while-revalidate coordinator.

mod common;

use std::sync::Arc;

use futures::FutureExt;
use reqflow_core::cache::{CacheCoordinator, RequestCache, SharedFetch};
use reqflow_core::error::RequestError;
use tokio::sync::oneshot;

use common::{advance, ms};

fn gated() -> (oneshot::Sender<()>, SharedFetch<String>) {
    let (tx, rx) = oneshot::channel::<()>();
    let future: reqflow_core::FetchFuture<String> = async move {
        match rx.await {
            Ok(()) => Ok("done".to_string()),
            Err(_) => Err(RequestError::Cancelled),
        }
    }
    .boxed();
    (tx, future.shared())
}

// =============================================================================
// Entries
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_evicts_on_read() {
    let cache = RequestCache::<String>::new();
    cache.set("k", "a".to_string());

    advance(50).await;
    assert_eq!(cache.get("k", Some(ms(100))).unwrap().data, "a");

    advance(100).await;
    assert!(cache.get("k", Some(ms(100))).is_none());
    assert_eq!(cache.len(), 0);

    advance(50).await;
    assert!(cache.get("k", None).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_expired_read_spares_rewritten_entry() {
    let cache = Arc::new(RequestCache::<u32>::new());
    cache.set("k", 1);
    advance(200).await;

    // Readers racing a writer: only entries older than the TTL are evicted.
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("k", Some(ms(100))).map(|e| e.data) })
        })
        .collect();
    cache.set("k", 2);
    for reader in readers {
        assert_eq!(reader.await.unwrap(), Some(2));
    }
    assert_eq!(cache.get("k", Some(ms(100))).unwrap().data, 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_ttl_never_expires() {
    let cache = RequestCache::<u32>::new();
    cache.set("k", 7);
    advance(3_600_000).await;
    assert_eq!(cache.get("k", None).unwrap().data, 7);
}

#[tokio::test(start_paused = true)]
async fn test_set_replaces_entry_and_timestamp() {
    let cache = RequestCache::<u32>::new();
    cache.set("k", 1);
    let first = cache.get("k", None).unwrap().timestamp;

    advance(500).await;
    cache.set("k", 2);
    let entry = cache.get("k", None).unwrap();
    assert_eq!(entry.data, 2);
    assert_eq!(entry.timestamp.duration_since(first), ms(500));
}

#[tokio::test(start_paused = true)]
async fn test_remove_and_clear() {
    let cache = RequestCache::<u32>::new();
    cache.set("a", 1);
    cache.set("b", 2);
    let (_tx, pending) = gated();
    let strings = RequestCache::<String>::new();
    strings.set_pending("p", pending);

    cache.remove("a");
    assert!(cache.get("a", None).is_none());
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
    strings.clear();
    assert!(!strings.has_pending("p"));
}

// =============================================================================
// Pending markers
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_pending_removed_when_settled() {
    let cache = RequestCache::<String>::new();
    let (tx, pending) = gated();
    cache.set_pending("k", pending.clone());
    assert!(cache.has_pending("k"));
    assert!(cache.pending_since("k").is_some());

    tx.send(()).unwrap();
    assert_eq!(pending.await.unwrap(), "done");
    advance(1).await;
    assert!(!cache.has_pending("k"));
}

#[tokio::test(start_paused = true)]
async fn test_set_clears_pending() {
    let cache = RequestCache::<String>::new();
    let (_tx, pending) = gated();
    cache.set_pending("k", pending);

    cache.set("k", "fresh".to_string());
    assert!(!cache.has_pending("k"));
    assert_eq!(cache.get("k", None).unwrap().data, "fresh");
}

#[tokio::test(start_paused = true)]
async fn test_older_pending_does_not_remove_newer() {
    let cache = RequestCache::<String>::new();
    let (first_tx, first) = gated();
    let (_second_tx, second) = gated();

    cache.set_pending("k", first.clone());
    cache.set_pending("k", second);

    first_tx.send(()).unwrap();
    first.await.unwrap();
    advance(1).await;

    assert!(cache.has_pending("k"));
}

#[tokio::test(start_paused = true)]
async fn test_joiners_share_one_result() {
    let cache = Arc::new(RequestCache::<String>::new());
    let (tx, pending) = gated();
    cache.set_pending("k", pending);

    let a = cache.get_pending("k").unwrap();
    let b = cache.get_pending("k").unwrap();
    tx.send(()).unwrap();

    let (a, b) = futures::join!(a, b);
    assert_eq!(a.unwrap(), "done");
    assert_eq!(b.unwrap(), "done");
}

// =============================================================================
// Coordinator
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_while_revalidate_windows() {
    let cache = Arc::new(RequestCache::<String>::new());
    let coordinator =
        CacheCoordinator::new(Arc::clone(&cache), "users", Some(ms(60_000)), Some(ms(10_000)));
    assert_eq!(coordinator.key(), "users");
    assert!(coordinator.should_revalidate());

    coordinator.store("cached".to_string());

    advance(5_000).await;
    assert_eq!(coordinator.get_fresh().as_deref(), Some("cached"));
    assert!(!coordinator.should_revalidate());

    advance(10_000).await;
    assert_eq!(coordinator.get_fresh().as_deref(), Some("cached"));
    assert!(coordinator.should_revalidate());

    advance(50_000).await;
    assert!(coordinator.get_fresh().is_none());
    assert!(coordinator.should_revalidate());
}

#[tokio::test(start_paused = true)]
async fn test_entry_without_stale_time_never_revalidates() {
    let cache = Arc::new(RequestCache::<u32>::new());
    let coordinator = CacheCoordinator::new(cache, "k", None, None);
    coordinator.store(1);

    advance(86_400_000).await;
    assert!(!coordinator.should_revalidate());

    coordinator.invalidate();
    assert!(coordinator.get_fresh().is_none());
    assert!(coordinator.should_revalidate());
}
