//! Tests for the request orchestrator: visibility, supersession, caching,
//! dedupe, loading delay, pagination, rate limiting and lifecycle.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use reqflow_core::cache::RequestCache;
use reqflow_core::error::{RequestError, ServiceError};
use reqflow_core::request::{service_fn, RequestOptions, RequestOrchestrator, Service};
use reqflow_core::scheduler::{DebounceConfig, ThrottleConfig};
use tokio_util::sync::CancellationToken;

use common::{
    advance, cancellable_service, echo_service, flaky_service, ms, versioned_service, Calls,
};

type Orchestrator = RequestOrchestrator<u32, String>;

fn options() -> RequestOptions<u32, String> {
    RequestOptions::default()
}

// =============================================================================
// Basic runs
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_async_publishes_result() {
    let calls = Calls::default();
    let orch = Orchestrator::new(echo_service(calls.clone(), ms(10)), options()).unwrap();

    let task = tokio::spawn(orch.run_async(1));
    assert_eq!(orch.state().request_count, 1);
    assert_eq!(orch.active_key().as_deref(), Some("_default"));

    advance(5).await;
    let state = orch.state();
    assert!(state.loading);
    assert_eq!(state.params, Some(1));

    assert_eq!(task.await.unwrap().unwrap(), "v1");
    let state = orch.state();
    assert!(state.is_idle());
    assert_eq!(state.data.as_deref(), Some("v1"));
    assert!(state.error.is_none());
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_see_updates() {
    let orch = Orchestrator::new(echo_service(Calls::default(), ms(10)), options()).unwrap();
    let mut rx = orch.subscribe();

    orch.run(4);
    advance(20).await;

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().data.as_deref(), Some("v4"));
}

#[tokio::test(start_paused = true)]
async fn test_only_active_key_is_visible() {
    let service = cancellable_service(Calls::default(), |p| if p == 1 { ms(40) } else { ms(5) });
    let orch = Orchestrator::new(service, options().fetch_key(|p| format!("k{p}"))).unwrap();

    let (slow, fast) = tokio::join!(orch.run_async(1), orch.run_async(2));

    // The discarded result still reaches its direct caller.
    assert_eq!(slow.unwrap(), "v1");
    assert_eq!(fast.unwrap(), "v2");
    let state = orch.state();
    assert_eq!(state.data.as_deref(), Some("v2"));
    assert_eq!(state.params, Some(2));
    assert_eq!(orch.active_key().as_deref(), Some("k2"));
}

#[tokio::test(start_paused = true)]
async fn test_same_key_supersedes_previous() {
    let orch =
        Orchestrator::new(cancellable_service(Calls::default(), |_| ms(100)), options()).unwrap();

    let (first, second) = tokio::join!(orch.run_async(1), orch.run_async(2));

    assert!(matches!(first, Err(RequestError::Superseded)));
    assert_eq!(second.unwrap(), "v2");
    let state = orch.state();
    assert_eq!(state.data.as_deref(), Some("v2"));
    assert!(state.error.is_none());
    assert_eq!(state.request_count, 2);
}

/// Service ignoring its token: params 1 answers after 100ms, anything else
/// after 10ms. Params 1 fails with a 500 when `slow_fails` is set.
fn token_blind_service(calls: Calls, slow_fails: bool) -> impl Service<u32, String> {
    service_fn(move |params: u32, _cancel: CancellationToken| {
        let calls = calls.clone();
        async move {
            calls.bump();
            let delay = if params == 1 { ms(100) } else { ms(10) };
            tokio::time::sleep(delay).await;
            if params == 1 && slow_fails {
                Err(RequestError::from(ServiceError::status(500, "late failure")))
            } else {
                Ok(format!("v{params}"))
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_late_success_of_superseded_request_is_discarded() {
    let successes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&successes);
    let orch = Orchestrator::new(
        token_blind_service(Calls::default(), false),
        options().on_success(move |data, _| seen.lock().push(data.clone())),
    )
    .unwrap();

    let (older, newer) = tokio::join!(orch.run_async(1), orch.run_async(2));

    // The older caller still gets its own result.
    assert_eq!(older.unwrap(), "v1");
    assert_eq!(newer.unwrap(), "v2");
    let state = orch.state();
    assert_eq!(state.data.as_deref(), Some("v2"));
    assert_eq!(state.params, Some(2));
    assert!(state.error.is_none());
    assert!(!state.loading);
    assert_eq!(*successes.lock(), vec!["v2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_late_failure_of_superseded_request_is_discarded() {
    let errors = Calls::default();
    let finals = Calls::default();
    let (seen, fin) = (errors.clone(), finals.clone());
    let orch = Orchestrator::new(
        token_blind_service(Calls::default(), true),
        options()
            .on_error(move |_, _| {
                seen.bump();
            })
            .on_finally(move |_, _, _| {
                fin.bump();
            }),
    )
    .unwrap();

    let (older, newer) = tokio::join!(orch.run_async(1), orch.run_async(2));

    assert_eq!(older.unwrap_err().status(), Some(500));
    assert_eq!(newer.unwrap(), "v2");
    let state = orch.state();
    assert_eq!(state.data.as_deref(), Some("v2"));
    assert!(state.error.is_none());
    assert!(!state.loading);
    assert_eq!(errors.get(), 0);
    assert_eq!(finals.get(), 1);
}

// =============================================================================
// Errors and hooks
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_error_reaches_state_and_hooks() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let finals = Calls::default();
    let successes = Calls::default();
    let (seen, fin, ok) = (Arc::clone(&errors), finals.clone(), successes.clone());
    let orch = Orchestrator::new(
        flaky_service(Calls::default(), |_| true, 500),
        options()
            .on_error(move |err, params| seen.lock().push((err.status(), *params)))
            .on_finally(move |_, data, err| {
                assert!(data.is_none() && err.is_some());
                fin.bump();
            })
            .on_success(move |_, _| {
                ok.bump();
            }),
    )
    .unwrap();

    let result = orch.run_async(3).await;

    assert_eq!(result.unwrap_err().status(), Some(500));
    let state = orch.state();
    assert!(!state.loading);
    assert_eq!(state.error.as_ref().and_then(RequestError::status), Some(500));
    assert_eq!(*errors.lock(), vec![(Some(500), 3)]);
    assert_eq!(finals.get(), 1);
    assert_eq!(successes.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_clears_previous_error() {
    let orch =
        Orchestrator::new(flaky_service(Calls::default(), |n| n == 1, 404), options()).unwrap();

    assert!(orch.run_async(1).await.is_err());
    assert!(orch.state().error.is_some());

    orch.run_async(1).await.unwrap();
    let state = orch.state();
    assert!(state.error.is_none());
    assert_eq!(state.data.as_deref(), Some("v1"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_clears_loading_without_error() {
    let errors = Calls::default();
    let seen = errors.clone();
    let orch = Orchestrator::new(
        cancellable_service(Calls::default(), |_| ms(1000)),
        options().on_error(move |_, _| {
            seen.bump();
        }),
    )
    .unwrap();

    let task = tokio::spawn(orch.run_async(1));
    advance(10).await;
    assert!(orch.state().loading);

    orch.cancel();
    assert!(!orch.state().loading);
    assert!(matches!(task.await.unwrap(), Err(RequestError::Cancelled)));
    let state = orch.state();
    assert!(state.error.is_none());
    assert!(state.data.is_none());
    assert_eq!(errors.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_external_token_cancels_fetches() {
    let parent = CancellationToken::new();
    let orch = Orchestrator::new(
        cancellable_service(Calls::default(), |_| ms(1000)),
        options().cancel_token(parent.clone()),
    )
    .unwrap();

    // Superseding a fetch cancels only its own child token.
    let (first, _) = tokio::join!(orch.run_async(1), async {
        let second = tokio::spawn(orch.run_async(2));
        advance(10).await;
        assert!(!parent.is_cancelled());
        assert!(orch.state().loading);
        parent.cancel();
        assert!(matches!(second.await.unwrap(), Err(RequestError::Cancelled)));
    });

    assert!(matches!(first, Err(RequestError::Superseded)));
    let state = orch.state();
    assert!(!state.loading);
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_in_orchestrator() {
    let calls = Calls::default();
    let retries = Calls::default();
    let seen = retries.clone();
    let orch = Orchestrator::new(
        flaky_service(calls.clone(), |n| n <= 2, 503),
        options().retry(2, ms(100), false).on_retry(move |_, _| {
            seen.bump();
        }),
    )
    .unwrap();

    assert_eq!(orch.run_async(1).await.unwrap(), "v1");
    assert_eq!(calls.get(), 3);
    assert_eq!(retries.get(), 2);
    assert!(orch.state().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_no_retry_by_default() {
    let calls = Calls::default();
    let orch = Orchestrator::new(flaky_service(calls.clone(), |_| true, 503), options()).unwrap();

    assert!(orch.run_async(1).await.is_err());
    assert_eq!(calls.get(), 1);
}

// =============================================================================
// Cache and dedupe
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cache_hit_skips_service() {
    let calls = Calls::default();
    let successes = Calls::default();
    let seen = successes.clone();
    let orch = Orchestrator::new(
        echo_service(calls.clone(), ms(10)),
        options().cache_key(|p| format!("item:{p}")).on_success(move |_, _| {
            seen.bump();
        }),
    )
    .unwrap();

    orch.run_async(1).await.unwrap();
    assert_eq!(orch.run_async(1).await.unwrap(), "v1");

    assert_eq!(calls.get(), 1);
    assert_eq!(successes.get(), 1);
    assert!(orch.cache().get("item:1", None).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stale_while_revalidate() {
    let calls = Calls::default();
    let orch = Orchestrator::new(
        versioned_service(calls.clone(), ms(10)),
        options()
            .cache_key(|_| "users".to_string())
            .stale_time(ms(10_000))
            .cache_time(ms(60_000)),
    )
    .unwrap();

    assert_eq!(orch.run_async(1).await.unwrap(), "v1-1");

    advance(5_000).await;
    assert_eq!(orch.run_async(1).await.unwrap(), "v1-1");
    assert_eq!(calls.get(), 1);

    advance(10_000).await;
    let task = tokio::spawn(orch.run_async(1));
    advance(1).await;
    let state = orch.state();
    assert_eq!(state.data.as_deref(), Some("v1-1"));
    assert!(state.loading);

    assert_eq!(task.await.unwrap().unwrap(), "v1-2");
    assert_eq!(orch.state().data.as_deref(), Some("v1-2"));
    assert_eq!(calls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetches_share_one_call() {
    let calls = Calls::default();
    let cache = Arc::new(RequestCache::new());
    let build = || {
        RequestOrchestrator::builder(echo_service(calls.clone(), ms(50)))
            .options(options().cache_key(|_| "shared".to_string()))
            .cache(Arc::clone(&cache))
            .build()
            .unwrap()
    };
    let (a, b) = (build(), build());

    let (ra, rb) = tokio::join!(a.run_async(1), b.run_async(1));

    assert_eq!(ra.unwrap(), "v1");
    assert_eq!(rb.unwrap(), "v1");
    assert_eq!(calls.get(), 1);
    assert_eq!(a.state().data.as_deref(), Some("v1"));
    assert_eq!(b.state().data.as_deref(), Some("v1"));
    assert!(!b.state().loading);
}

#[tokio::test(start_paused = true)]
async fn test_joined_fetch_runs_hooks_once() {
    let calls = Calls::default();
    let successes = Calls::default();
    let finals = Calls::default();
    let cache = Arc::new(RequestCache::new());
    let build = || {
        let (ok, fin) = (successes.clone(), finals.clone());
        RequestOrchestrator::builder(echo_service(calls.clone(), ms(50)))
            .options(
                options()
                    .cache_key(|_| "shared".to_string())
                    .on_success(move |_, _| {
                        ok.bump();
                    })
                    .on_finally(move |_, _, _| {
                        fin.bump();
                    }),
            )
            .cache(Arc::clone(&cache))
            .build()
            .unwrap()
    };
    let (a, b) = (build(), build());

    let (ra, rb) = tokio::join!(a.run_async(1), b.run_async(1));

    assert_eq!(ra.unwrap(), "v1");
    assert_eq!(rb.unwrap(), "v1");
    assert_eq!(calls.get(), 1);
    assert_eq!(successes.get(), 1);
    assert_eq!(finals.get(), 1);
    assert_eq!(cache.get("shared", None).unwrap().data, "v1");
}

#[tokio::test(start_paused = true)]
async fn test_joined_failure_reports_error_once() {
    let calls = Calls::default();
    let errors = Calls::default();
    let cache = Arc::new(RequestCache::new());
    let build = || {
        let (counter, seen) = (calls.clone(), errors.clone());
        let service = service_fn(move |_: u32, _cancel: CancellationToken| {
            let counter = counter.clone();
            async move {
                counter.bump();
                tokio::time::sleep(ms(50)).await;
                Err::<String, _>(RequestError::from(ServiceError::status(500, "down")))
            }
        });
        RequestOrchestrator::builder(service)
            .options(options().cache_key(|_| "shared".to_string()).on_error(move |_, _| {
                seen.bump();
            }))
            .cache(Arc::clone(&cache))
            .build()
            .unwrap()
    };
    let (a, b) = (build(), build());

    let (ra, rb) = tokio::join!(a.run_async(1), b.run_async(1));

    assert_eq!(ra.unwrap_err().status(), Some(500));
    assert_eq!(rb.unwrap_err().status(), Some(500));
    assert_eq!(calls.get(), 1);
    assert_eq!(errors.get(), 1);
    assert!(a.state().error.is_some());
    assert!(b.state().error.is_some());
    assert!(!b.state().loading);
}

#[tokio::test(start_paused = true)]
async fn test_failure_evicts_cache_entry() {
    let calls = Calls::default();
    let orch = Orchestrator::new(
        flaky_service(calls.clone(), |n| n == 2, 500),
        options()
            .cache_key(|_| "k".to_string())
            .stale_time(ms(100)),
    )
    .unwrap();

    orch.run_async(1).await.unwrap();
    advance(200).await;
    assert!(orch.run_async(1).await.is_err());
    assert!(orch.cache().get("k", None).is_none());
}

// =============================================================================
// Loading delay
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_loading_delay_hides_fast_requests() {
    let service = cancellable_service(Calls::default(), |p| if p == 1 { ms(50) } else { ms(300) });
    let orch = Orchestrator::new(service, options().loading_delay(ms(100))).unwrap();

    let fast = tokio::spawn(orch.run_async(1));
    advance(40).await;
    assert!(!orch.state().loading);
    fast.await.unwrap().unwrap();
    advance(200).await;
    assert!(!orch.state().loading);

    let slow = tokio::spawn(orch.run_async(2));
    advance(50).await;
    assert!(!orch.state().loading);
    advance(100).await;
    assert!(orch.state().loading);
    slow.await.unwrap().unwrap();
    assert!(!orch.state().loading);
}

// =============================================================================
// Mutate, refresh, load more
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_mutate_replaces_data_locally() {
    let calls = Calls::default();
    let orch = Orchestrator::new(echo_service(calls.clone(), ms(1)), options()).unwrap();
    orch.run_async(1).await.unwrap();

    orch.mutate(|data| data.map(|d| format!("{d}!")));

    assert_eq!(orch.state().data.as_deref(), Some("v1!"));
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_reuses_last_params() {
    let calls = Calls::default();
    let orch = Orchestrator::new(versioned_service(calls.clone(), ms(1)), options()).unwrap();

    assert!(matches!(orch.refresh(), Err(RequestError::NoPreviousParams)));
    assert!(matches!(orch.refresh_async(), Err(RequestError::NoPreviousParams)));

    orch.run_async(7).await.unwrap();
    assert_eq!(orch.refresh_async().unwrap().await.unwrap(), "v7-2");
    assert_eq!(orch.state().params, Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_load_more_requires_configuration() {
    let orch = Orchestrator::new(echo_service(Calls::default(), ms(1)), options()).unwrap();
    orch.run_async(1).await.unwrap();
    assert!(matches!(orch.load_more(), Err(RequestError::LoadMoreUnavailable)));

    let paged = Orchestrator::new(
        echo_service(Calls::default(), ms(1)),
        options().load_more(|p, _| p + 1, |_, page| page),
    )
    .unwrap();
    assert!(matches!(paged.load_more_async(), Err(RequestError::NoPreviousParams)));
}

#[tokio::test(start_paused = true)]
async fn test_load_more_merges_pages() {
    let befores = Calls::default();
    let seen = befores.clone();
    let service = service_fn(|page: u32, _cancel: CancellationToken| async move {
        tokio::time::sleep(ms(10)).await;
        Ok::<_, RequestError>(vec![page * 10, page * 10 + 1])
    });
    let orch = RequestOrchestrator::new(
        service,
        RequestOptions::default()
            .load_more(
                |page: &u32, _| page + 1,
                |previous: Option<&Vec<u32>>, next: Vec<u32>| {
                    let mut merged = previous.cloned().unwrap_or_default();
                    merged.extend(next);
                    merged
                },
            )
            .has_more(|items: &Vec<u32>| items.len() < 6)
            .on_before(move |_| {
                seen.bump();
            }),
    )
    .unwrap();

    orch.run_async(1).await.unwrap();
    assert_eq!(orch.state().has_more, Some(true));

    let task = tokio::spawn(orch.load_more_async().unwrap());
    advance(5).await;
    let state = orch.state();
    assert!(state.loading_more);
    assert!(!state.loading);
    assert_eq!(task.await.unwrap().unwrap(), vec![10, 11, 20, 21]);

    orch.load_more_async().unwrap().await.unwrap();
    let state = orch.state();
    assert_eq!(state.data, Some(vec![10, 11, 20, 21, 30, 31]));
    assert_eq!(state.has_more, Some(false));
    assert_eq!(state.params, Some(3));
    assert!(state.is_idle());
    assert_eq!(befores.get(), 1);
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_debounce_with_throttle_rejected() {
    let result = Orchestrator::new(
        echo_service(Calls::default(), ms(1)),
        options()
            .debounce(DebounceConfig::new(ms(100)))
            .throttle(ThrottleConfig::new(ms(100))),
    );
    assert!(matches!(result, Err(RequestError::InvalidConfig(_))));

    let orch = Orchestrator::new(
        echo_service(Calls::default(), ms(1)),
        options().debounce(DebounceConfig::new(ms(100))),
    )
    .unwrap();
    assert!(matches!(
        orch.set_throttle(Some(ThrottleConfig::new(ms(100)))),
        Err(RequestError::InvalidConfig(_))
    ));
    orch.set_debounce(None).unwrap();
    orch.set_throttle(Some(ThrottleConfig::new(ms(100)))).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_set_debounce_applies_to_later_runs() {
    let calls = Calls::default();
    let orch = Orchestrator::new(echo_service(calls.clone(), ms(10)), options()).unwrap();

    orch.set_debounce(Some(DebounceConfig::new(ms(200)))).unwrap();
    let first = orch.run_async(1);
    let second = orch.run_async(2);
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first, Err(RequestError::DebounceCancelled)));
    assert_eq!(second.unwrap(), "v2");
    assert_eq!(calls.get(), 1);

    orch.set_debounce(None).unwrap();
    orch.set_throttle(Some(ThrottleConfig::new(ms(1000)))).unwrap();
    assert_eq!(orch.run_async(3).await.unwrap(), "v3");
    assert_eq!(calls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_debounced_runs_collapse() {
    let calls = Calls::default();
    let befores = Calls::default();
    let seen = befores.clone();
    let orch = Orchestrator::new(
        echo_service(calls.clone(), ms(10)),
        options()
            .debounce(DebounceConfig::new(ms(300)))
            .on_before(move |_| {
                seen.bump();
            }),
    )
    .unwrap();

    let first = orch.run_async(1);
    advance(100).await;
    let second = orch.run_async(2);
    advance(100).await;
    let third = orch.run_async(3);

    let results = futures::future::join_all([first, second, third]).await;
    assert!(matches!(results[0], Err(RequestError::DebounceCancelled)));
    assert!(matches!(results[1], Err(RequestError::DebounceCancelled)));
    assert_eq!(results[2].as_deref().unwrap(), "v3");
    assert_eq!(calls.get(), 1);
    assert_eq!(befores.get(), 1);
    assert_eq!(orch.state().params, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_rejects_parked_debounced_run() {
    let calls = Calls::default();
    let orch = Orchestrator::new(
        echo_service(calls.clone(), ms(10)),
        options().debounce(DebounceConfig::new(ms(300))),
    )
    .unwrap();

    let parked = orch.run_async(1);
    orch.cancel();

    assert!(matches!(parked.await, Err(RequestError::DebounceCancelled)));
    advance(500).await;
    assert_eq!(calls.get(), 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_runs_default_params_once() {
    let calls = Calls::default();
    let orch =
        Orchestrator::new(echo_service(calls.clone(), ms(10)), options().default_params(7))
            .unwrap();

    orch.start();
    orch.start();
    advance(20).await;

    assert_eq!(calls.get(), 1);
    assert_eq!(orch.state().data.as_deref(), Some("v7"));
}

#[tokio::test(start_paused = true)]
async fn test_manual_start_does_not_run() {
    let calls = Calls::default();
    let orch = Orchestrator::new(
        echo_service(calls.clone(), ms(10)),
        options().default_params(7).manual(true),
    )
    .unwrap();

    orch.start();
    advance(20).await;
    assert_eq!(calls.get(), 0);
    assert_eq!(orch.state().request_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_gates_automatic_run() {
    let calls = Calls::default();
    let orch = Orchestrator::new(
        echo_service(calls.clone(), ms(10)),
        options().default_params(7).ready(false),
    )
    .unwrap();

    orch.start();
    advance(20).await;
    assert_eq!(calls.get(), 0);
    assert!(!orch.is_ready());

    orch.set_ready(true);
    advance(20).await;
    assert_eq!(calls.get(), 1);

    // Becoming ready again does not rerun an orchestrator that already ran.
    orch.set_ready(false);
    orch.set_ready(true);
    advance(20).await;
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_deps_change_triggers_refresh() {
    let calls = Calls::default();
    let orch =
        Orchestrator::new(echo_service(calls.clone(), ms(10)), options().default_params(1))
            .unwrap();
    orch.start();
    advance(20).await;

    orch.set_refresh_deps("a");
    orch.set_refresh_deps("a");
    advance(20).await;
    assert_eq!(calls.get(), 1);

    orch.set_refresh_deps("b");
    advance(20).await;
    assert_eq!(calls.get(), 2);
    assert_eq!(orch.state().params, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_and_rejects() {
    let calls = Calls::default();
    let orch =
        Orchestrator::new(cancellable_service(calls.clone(), |_| ms(1000)), options()).unwrap();

    let task = tokio::spawn(orch.run_async(1));
    advance(10).await;
    orch.dispose();

    assert!(orch.is_disposed());
    assert!(matches!(task.await.unwrap(), Err(RequestError::Cancelled)));
    assert!(!orch.state().loading);
    assert!(matches!(orch.run_async(2).await, Err(RequestError::Cancelled)));
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_classifier_hides_errors() {
    let orch = Orchestrator::new(
        flaky_service(Calls::default(), |_| true, 499),
        options().error_classifier(|err| match err.status() {
            Some(499) => reqflow_core::ErrorClass::Cancellation,
            _ => err.class(),
        }),
    )
    .unwrap();

    assert!(orch.run_async(1).await.is_err());
    let state = orch.state();
    assert!(state.error.is_none());
    assert!(!state.loading);
}

#[tokio::test(start_paused = true)]
async fn test_service_error_message_preserved() {
    let service = service_fn(|_: u32, _cancel: CancellationToken| async {
        Err::<String, _>(RequestError::from(ServiceError::other("bad payload")))
    });
    let orch = Orchestrator::new(service, options()).unwrap();

    let err = orch.run_async(1).await.unwrap_err();
    assert!(err.to_string().contains("bad payload"));
}
