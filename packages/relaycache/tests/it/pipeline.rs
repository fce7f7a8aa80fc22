use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq as pretty_assert_eq;
use relaycache::{
    Args, Cache, CacheValue, CallOptions, Error, MemoryBackend, Tag, Tags, invalidate_async,
};

use crate::DownBackend;

fn opts() -> CallOptions {
    CallOptions::builder().ttl(Duration::from_secs(60)).build()
}

#[tokio::test]
async fn concurrent_identical_calls_compute_once() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let opts = opts();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        let opts = opts.clone();
        handles.push(tokio::spawn(async move {
            cache
                .run_async("math.square", Args::new().arg(12_i64), &opts, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(12_i64 * 12_i64)
                })
                .await
        }));
    }

    for handle in handles {
        let value: i64 = handle.await.unwrap().unwrap();
        pretty_assert_eq!(value, 144);
    }
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn named_argument_order_is_irrelevant() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = AtomicUsize::new(0);
    let opts = opts();

    let first: i64 = cache
        .run_async(
            "report",
            Args::new().named("a", 1).named("b", 2),
            &opts,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
        )
        .await
        .unwrap();
    let second: i64 = cache
        .run_async(
            "report",
            Args::new().named("b", 2).named("a", 1),
            &opts,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            },
        )
        .await
        .unwrap();

    pretty_assert_eq!(first, 1);
    // The second call is a hit on the first call's entry.
    pretty_assert_eq!(second, 1);
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_ttl_disables_caching() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = AtomicUsize::new(0);
    let opts = CallOptions::builder().ttl(Duration::ZERO).build();

    for _ in 0..2 {
        let value: i64 = cache
            .run_async("uncached", Args::new(), &opts, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(9)
            })
            .await
            .unwrap();
        pretty_assert_eq!(value, 9);
    }
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 2);
    pretty_assert_eq!(cache.backend().stats().sets, 0);
}

#[tokio::test]
async fn unavailable_backend_degrades_to_computing() {
    let cache = Cache::new(DownBackend);
    let opts = opts();

    let value: i64 = cache
        .run_async("degraded", Args::new().arg(3_i64), &opts, || async { Ok(3 + 4) })
        .await
        .unwrap();
    pretty_assert_eq!(value, 7);
}

#[tokio::test]
async fn unavailable_lock_service_degrades_to_computing() {
    let cache = Cache::new(DownBackend);
    let opts = CallOptions::builder()
        .ttl(Duration::from_secs(60))
        .distributed(true)
        .build();

    let value: i64 = cache
        .run_async("degraded.locked", Args::new(), &opts, || async { Ok(11) })
        .await
        .unwrap();
    pretty_assert_eq!(value, 11);
}

#[tokio::test]
async fn user_errors_propagate_and_are_not_cached() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = AtomicUsize::new(0);
    let opts = opts();

    let result: Result<i64, Error> = cache
        .run_async("flaky", Args::new(), &opts, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom".into())
        })
        .await;
    assert!(matches!(result, Err(Error::User(_))));

    // The failure was not cached; the next call runs the computation.
    let value: i64 = cache
        .run_async("flaky", Args::new(), &opts, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(5)
        })
        .await
        .unwrap();
    pretty_assert_eq!(value, 5);
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn distributed_mode_computes_once_per_group() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let opts = CallOptions::builder()
        .ttl(Duration::from_secs(60))
        .distributed(true)
        .dist_lock_ttl(Duration::from_secs(5))
        .dist_lock_timeout(Duration::from_secs(2))
        .build();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        let opts = opts.clone();
        handles.push(tokio::spawn(async move {
            cache
                .run_async("dist", Args::new().arg(1_i64), &opts, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(1_i64)
                })
                .await
        }));
    }
    for handle in handles {
        let value: i64 = handle.await.unwrap().unwrap();
        pretty_assert_eq!(value, 1);
    }
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_key_function_pins_the_entry() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = AtomicUsize::new(0);
    let opts = CallOptions::builder()
        .ttl(Duration::from_secs(60))
        .key(Arc::new(|_: &Args| "pinned".to_string()))
        .build();

    // Different arguments, same caller-chosen key: one computation.
    for n in [1_i64, 2_i64] {
        let value: i64 = cache
            .run_async("keyed", Args::new().arg(n), &opts, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            })
            .await
            .unwrap();
        pretty_assert_eq!(value, 1);
    }
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn derived_tags_support_invalidation() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = AtomicUsize::new(0);
    let opts = CallOptions::builder()
        .ttl(Duration::from_secs(60))
        .tags(Tags::derive(|args: &Args| {
            args.positional()
                .iter()
                .filter_map(|value| match value {
                    CacheValue::Str(user) => Some(Tag::from(format!("user:{user}"))),
                    _ => None,
                })
                .collect()
        }))
        .build();

    let compute = |calls: &AtomicUsize| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok("profile".to_string())
    };

    let _: String = cache
        .run_async("profile", Args::new().arg("alice"), &opts, || async {
            compute(&calls)
        })
        .await
        .unwrap();

    let report = invalidate_async(cache.backend(), &[], &[Tag::from("user:alice")])
        .await
        .unwrap();
    pretty_assert_eq!(report.entries_invalidated, 1);

    // The entry is gone, so the next call recomputes.
    let _: String = cache
        .run_async("profile", Args::new().arg("alice"), &opts, || async {
            compute(&calls)
        })
        .await
        .unwrap();
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn blocking_surface_computes_once() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(std::sync::Barrier::new(5));
    let opts = opts();

    let handles = (0..5)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            let opts = opts.clone();
            std::thread::spawn(move || {
                barrier.wait();
                cache.run("blocking", Args::new().arg(2_i64), &opts, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(100));
                    Ok(2_i64 * 2_i64)
                })
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let value: i64 = handle.join().unwrap().unwrap();
        pretty_assert_eq!(value, 4);
    }
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 1);
    pretty_assert_eq!(cache.stats().sets, 1);
}

#[test]
fn blocking_hit_skips_the_computation() {
    let cache = Cache::new(MemoryBackend::default());
    let calls = AtomicUsize::new(0);
    let opts = opts();

    for _ in 0..3 {
        let value: i64 = cache
            .run("hit", Args::new().arg(10_i64), &opts, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(100)
            })
            .unwrap();
        pretty_assert_eq!(value, 100);
    }
    pretty_assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    pretty_assert_eq!(stats.hits, 2);
}
