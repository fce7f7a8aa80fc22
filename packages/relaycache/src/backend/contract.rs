//! The backend contract: traits, tags, and statistics.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::Fingerprint;

/// A short string associated with cache entries for bulk invalidation.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, Serialize, Deserialize,
)]
pub struct Tag(String);

impl Tag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Tag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl From<&str> for Tag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

/// Trait for blocking cache backend implementations.
///
/// Every operation blocks the calling thread at transport boundaries.
/// Implementations are cheaply cloneable handles sharing one store.
pub trait CacheBackend: Clone + Send + Sync + 'static {
    /// Look up an entry. Absent and expired entries are misses; expired
    /// entries may be lazily deleted on the way through.
    fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>>;

    /// Store an entry, overwriting any previous value and replacing its tag
    /// memberships with `tags`.
    ///
    /// `ttl: None` applies the backend's default TTL; a backend with no
    /// default stores the entry without expiry.
    fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()>;

    /// Remove an entry. Returns whether a live entry was removed.
    fn delete(&self, key: &Fingerprint) -> Result<bool>;

    /// Hit-test without returning the value, respecting TTL.
    fn contains(&self, key: &Fingerprint) -> Result<bool>;

    /// Delete every entry currently listed under any of `tags`, keeping the
    /// tag index consistent. Returns the number of live entries removed.
    fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize>;

    /// Remove all entries and indices this backend owns under its
    /// configured prefix.
    fn clear(&self) -> Result<()>;

    /// Best-effort counter snapshot; not atomic across counters.
    fn stats(&self) -> StatsSnapshot;

    /// Remaining lifetime of an entry. `None` for missing entries and for
    /// entries without expiry.
    fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>>;
}

/// Trait for cooperative (async) cache backend implementations.
///
/// Semantically identical to [`CacheBackend`]; suspension may occur only at
/// transport boundaries.
pub trait AsyncCacheBackend: Clone + Send + Sync + 'static {
    fn get(&self, key: &Fingerprint) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, key: &Fingerprint) -> impl Future<Output = Result<bool>> + Send;

    fn contains(&self, key: &Fingerprint) -> impl Future<Output = Result<bool>> + Send;

    fn invalidate_tags(&self, tags: &[Tag]) -> impl Future<Output = Result<usize>> + Send;

    fn clear(&self) -> impl Future<Output = Result<()>> + Send;

    fn stats(&self) -> impl Future<Output = StatsSnapshot> + Send;

    fn ttl(&self, key: &Fingerprint) -> impl Future<Output = Result<Option<Duration>>> + Send;
}

/// Monotonic operation counters kept by every backend.
///
/// Counters are atomics so readers never block writers; snapshots are
/// best-effort.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self, size: u64) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size,
        }
    }

}

/// A point-in-time view of a backend's counters and size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub invalidations: u64,
    /// Live entry count gauge; approximate for remote backends.
    pub size: u64,
}
