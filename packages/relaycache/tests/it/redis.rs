//! Tests against a live redis server.
//!
//! Every test carves out its own prefix pair and skips (with a note) when
//! no server is reachable. Point `TEST_REDIS_URL` somewhere else to test
//! against a non-local server; database 15 is used by default.

use std::time::Duration;

use pretty_assertions::assert_eq as pretty_assert_eq;
use relaycache::{AdvisoryLock, AsyncRedisBackend, Fingerprint, RedisBackend, Tag};

fn redis_url() -> String {
    std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string())
}

/// Connect with test-scoped prefixes, or `None` when redis is unreachable.
fn sync_backend(test: &str) -> Option<RedisBackend> {
    let url = redis_url();
    let backend = RedisBackend::builder()
        .url(&url)
        .value_prefix(format!("rc:test:{test}:"))
        .meta_prefix(format!("rcmeta:test:{test}"))
        .build();
    match backend {
        Ok(backend) => {
            backend.clear().ok()?;
            Some(backend)
        }
        Err(_) => {
            eprintln!("skipping: redis is not available on the test host");
            None
        }
    }
}

async fn async_backend(test: &str) -> Option<AsyncRedisBackend> {
    let url = redis_url();
    let backend = AsyncRedisBackend::builder()
        .url(&url)
        .value_prefix(format!("rc:test:{test}:"))
        .meta_prefix(format!("rcmeta:test:{test}"))
        .build()
        .await;
    match backend {
        Ok(backend) => {
            backend.clear().await.ok()?;
            Some(backend)
        }
        Err(_) => {
            eprintln!("skipping: redis is not available on the test host");
            None
        }
    }
}

fn key(raw: &str) -> Fingerprint {
    Fingerprint::from(raw)
}

#[test]
fn round_trip_with_counters() {
    let Some(backend) = sync_backend("round-trip") else {
        return;
    };
    backend
        .set(&key("x"), b"42", Some(Duration::from_secs(10)), &[])
        .unwrap();
    pretty_assert_eq!(backend.get(&key("x")).unwrap(), Some(b"42".to_vec()));
    pretty_assert_eq!(backend.get(&key("missing")).unwrap(), None);

    let stats = backend.stats();
    pretty_assert_eq!(stats.sets, 1);
    pretty_assert_eq!(stats.hits, 1);
    pretty_assert_eq!(stats.misses, 1);
    pretty_assert_eq!(stats.size, 1);

    backend.clear().unwrap();
}

#[test]
fn entries_expire() {
    let Some(backend) = sync_backend("expiry") else {
        return;
    };
    backend
        .set(&key("y"), b"1", Some(Duration::from_millis(100)), &[])
        .unwrap();
    std::thread::sleep(Duration::from_millis(250));
    pretty_assert_eq!(backend.get(&key("y")).unwrap(), None);
    pretty_assert_eq!(backend.ttl(&key("y")).unwrap(), None);
}

#[test]
fn tag_invalidation_hits_only_tagged_entries() {
    let Some(backend) = sync_backend("tags") else {
        return;
    };
    let ttl = Some(Duration::from_secs(60));
    backend
        .set(
            &key("p1"),
            b"A",
            ttl,
            &[Tag::from("electronics"), Tag::from("products")],
        )
        .unwrap();
    backend
        .set(&key("p2"), b"B", ttl, &[Tag::from("products")])
        .unwrap();
    backend
        .set(&key("u1"), b"U", ttl, &[Tag::from("users")])
        .unwrap();

    let removed = backend.invalidate_tags(&[Tag::from("electronics")]).unwrap();
    pretty_assert_eq!(removed, 1);
    pretty_assert_eq!(backend.get(&key("p1")).unwrap(), None);
    pretty_assert_eq!(backend.get(&key("p2")).unwrap(), Some(b"B".to_vec()));
    pretty_assert_eq!(backend.get(&key("u1")).unwrap(), Some(b"U".to_vec()));

    backend.clear().unwrap();
}

#[test]
fn persisted_layout_is_interoperable() {
    let Some(backend) = sync_backend("layout") else {
        return;
    };
    backend
        .set(
            &key("abc"),
            b"V",
            Some(Duration::from_secs(60)),
            &[Tag::from("users")],
        )
        .unwrap();

    let client = redis::Client::open(redis_url().as_str()).unwrap();
    let mut con = client.get_connection().unwrap();

    let value: Option<Vec<u8>> = redis::cmd("GET")
        .arg("rc:test:layout:abc")
        .query(&mut con)
        .unwrap();
    pretty_assert_eq!(value, Some(b"V".to_vec()));

    let tags: Vec<String> = redis::cmd("SMEMBERS")
        .arg("rcmeta:test:layout:k:abc")
        .query(&mut con)
        .unwrap();
    pretty_assert_eq!(tags, vec!["users".to_string()]);

    let keys: Vec<String> = redis::cmd("SMEMBERS")
        .arg("rcmeta:test:layout:t:users")
        .query(&mut con)
        .unwrap();
    pretty_assert_eq!(keys, vec!["abc".to_string()]);

    backend.clear().unwrap();
}

#[test]
fn clear_is_scoped_to_the_configured_prefixes() {
    let Some(backend) = sync_backend("scoped-clear") else {
        return;
    };
    let client = redis::Client::open(redis_url().as_str()).unwrap();
    let mut con = client.get_connection().unwrap();
    let _: () = redis::cmd("SET")
        .arg("unrelated:keep")
        .arg("1")
        .query(&mut con)
        .unwrap();

    backend
        .set(&key("mine"), b"1", Some(Duration::from_secs(60)), &[])
        .unwrap();
    backend.clear().unwrap();

    pretty_assert_eq!(backend.get(&key("mine")).unwrap(), None);
    let survivor: Option<String> = redis::cmd("GET")
        .arg("unrelated:keep")
        .query(&mut con)
        .unwrap();
    pretty_assert_eq!(survivor, Some("1".to_string()));

    let _: () = redis::cmd("DEL").arg("unrelated:keep").query(&mut con).unwrap();
}

#[test]
fn resetting_replaces_tag_memberships() {
    let Some(backend) = sync_backend("retag") else {
        return;
    };
    let ttl = Some(Duration::from_secs(60));
    backend
        .set(&key("k"), b"a", ttl, &[Tag::from("old")])
        .unwrap();
    backend
        .set(&key("k"), b"b", ttl, &[Tag::from("new")])
        .unwrap();

    pretty_assert_eq!(backend.invalidate_tags(&[Tag::from("old")]).unwrap(), 0);
    pretty_assert_eq!(backend.get(&key("k")).unwrap(), Some(b"b".to_vec()));
    pretty_assert_eq!(backend.invalidate_tags(&[Tag::from("new")]).unwrap(), 1);
    pretty_assert_eq!(backend.get(&key("k")).unwrap(), None);

    backend.clear().unwrap();
}

#[test]
fn lock_is_exclusive_owner_scoped_and_expiring() {
    let Some(backend) = sync_backend("lock") else {
        return;
    };
    let ttl = Duration::from_secs(5);
    assert!(backend.try_acquire("job", "owner-1", ttl).unwrap());
    assert!(!backend.try_acquire("job", "owner-2", ttl).unwrap());
    // Re-acquisition by the holder refreshes the lock.
    assert!(backend.try_acquire("job", "owner-1", ttl).unwrap());

    assert!(!backend.release("job", "owner-2").unwrap());
    assert!(backend.release("job", "owner-1").unwrap());
    assert!(backend.try_acquire("job", "owner-2", ttl).unwrap());
    assert!(backend.release("job", "owner-2").unwrap());

    // An expired lock is free for the taking.
    assert!(backend
        .try_acquire("job", "a", Duration::from_millis(50))
        .unwrap());
    std::thread::sleep(Duration::from_millis(100));
    assert!(backend.try_acquire("job", "b", ttl).unwrap());
    assert!(backend.release("job", "b").unwrap());

    backend.clear().unwrap();
}

#[tokio::test]
async fn async_backend_round_trips_and_invalidates() {
    let Some(backend) = async_backend("async").await else {
        return;
    };
    let ttl = Some(Duration::from_secs(60));
    backend
        .set(&key("a"), b"1", ttl, &[Tag::from("t")])
        .await
        .unwrap();
    pretty_assert_eq!(backend.get(&key("a")).await.unwrap(), Some(b"1".to_vec()));
    assert!(backend.contains(&key("a")).await.unwrap());
    assert!(backend.ttl(&key("a")).await.unwrap().is_some());

    pretty_assert_eq!(
        backend.invalidate_tags(&[Tag::from("t")]).await.unwrap(),
        1
    );
    pretty_assert_eq!(backend.get(&key("a")).await.unwrap(), None);

    backend.clear().await.unwrap();
}

#[tokio::test]
async fn sync_and_async_backends_interoperate() {
    let Some(sync) = sync_backend("interop") else {
        return;
    };
    let Some(async_side) = async_backend("interop").await else {
        return;
    };

    sync.set(
        &key("shared"),
        b"payload",
        Some(Duration::from_secs(60)),
        &[Tag::from("both")],
    )
    .unwrap();

    pretty_assert_eq!(
        async_side.get(&key("shared")).await.unwrap(),
        Some(b"payload".to_vec())
    );
    pretty_assert_eq!(
        async_side
            .invalidate_tags(&[Tag::from("both")])
            .await
            .unwrap(),
        1
    );
    pretty_assert_eq!(sync.get(&key("shared")).unwrap(), None);

    sync.clear().unwrap();
}
