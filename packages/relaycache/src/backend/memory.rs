//! Process-local cache backend.
//!
//! A single in-process store: a forward map of keys to entries, a reverse
//! map from tags to key sets, and statistics counters. All mutating
//! operations serialize through one mutex.
//!
//! Expiration is lazy (checked on `get`/`contains`/`ttl`) and opportunistic
//! (expired entries encountered during tag invalidation are dropped). Since
//! lazy-only schemes retain memory for long-lived unused keys, an optional
//! background sweeper removes a bounded number of expired entries per tick;
//! see [`MemoryBackend::spawn_sweeper`].
//!
//! When `max_size` is configured, entries beyond the bound are evicted
//! least-recently-used: a `get` hit bumps recency, `contains` does not.
//!
//! The backend also keeps an in-process advisory lock table, so pipelines
//! configured for distributed singleflight work against it unchanged.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bon::bon;
use derive_more::Debug;
use tracing::{debug, instrument, trace};

use super::contract::{AsyncCacheBackend, CacheBackend, Stats, StatsSnapshot, Tag};
use crate::error::{Error, PoisonedLock, Result};
use crate::key::Fingerprint;
use crate::lock::{AdvisoryLock, AsyncAdvisoryLock};

/// Process-local cache backend.
///
/// Cheaply cloneable; clones share the same store.
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    #[debug(skip)]
    inner: Arc<Inner>,
}

struct Inner {
    store: Mutex<Store>,
    locks: Mutex<HashMap<String, HeldLock>>,
    stats: Stats,
    default_ttl: Option<Duration>,
    max_size: Option<usize>,
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, Entry>,
    by_tag: HashMap<Tag, HashSet<String>>,
    /// Recency index: tick of last use, oldest first.
    recency: BTreeMap<u64, String>,
    clock: u64,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    tags: BTreeSet<Tag>,
    tick: u64,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct HeldLock {
    owner: String,
    expires_at: Instant,
}

#[bon]
impl MemoryBackend {
    /// Create a backend.
    ///
    /// `default_ttl` applies to entries stored without an explicit TTL;
    /// without it such entries never expire. `max_size` bounds the entry
    /// count with LRU eviction.
    #[builder]
    pub fn new(default_ttl: Option<Duration>, max_size: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(Store::default()),
                locks: Mutex::new(HashMap::new()),
                stats: Stats::default(),
                default_ttl,
                max_size,
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MemoryBackend {
    fn store(&self) -> Result<MutexGuard<'_, Store>> {
        self.inner
            .store
            .lock()
            .map_err(|_| Error::backend("lock", PoisonedLock))
    }

    #[instrument(name = "MemoryBackend::get", skip(self))]
    pub fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let mut store = self.store()?;
        let now = Instant::now();
        let expired = match store.entries.get(key.as_str()) {
            None => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Some(entry) => entry.expired(now),
        };
        if expired {
            store.remove(key.as_str());
            self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
            self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
            trace!(%key, "dropped expired entry");
            return Ok(None);
        }
        let value = store.touch_and_read(key.as_str());
        self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    #[instrument(name = "MemoryBackend::set", skip(self, value))]
    pub fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        let ttl = ttl.or(self.inner.default_ttl);
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        let mut store = self.store()?;
        store.remove(key.as_str());
        store.clock += 1;
        let tick = store.clock;
        store.entries.insert(
            key.as_str().to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
                tags: tags.iter().cloned().collect(),
                tick,
            },
        );
        store.recency.insert(tick, key.as_str().to_string());
        for tag in tags {
            store
                .by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.as_str().to_string());
        }
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);

        if let Some(max_size) = self.inner.max_size {
            while store.entries.len() > max_size {
                let Some((_, victim)) = store.recency.pop_first() else {
                    break;
                };
                store.remove(&victim);
                self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim, "evicted least-recently-used entry");
            }
        }
        Ok(())
    }

    #[instrument(name = "MemoryBackend::delete", skip(self))]
    pub fn delete(&self, key: &Fingerprint) -> Result<bool> {
        let mut store = self.store()?;
        let now = Instant::now();
        match store.remove(key.as_str()) {
            Some(entry) if entry.expired(now) => {
                self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    #[instrument(name = "MemoryBackend::contains", skip(self))]
    pub fn contains(&self, key: &Fingerprint) -> Result<bool> {
        let mut store = self.store()?;
        let now = Instant::now();
        let expired = match store.entries.get(key.as_str()) {
            None => return Ok(false),
            Some(entry) => entry.expired(now),
        };
        if expired {
            store.remove(key.as_str());
            self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        Ok(true)
    }

    #[instrument(name = "MemoryBackend::invalidate_tags", skip(self))]
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize> {
        let mut store = self.store()?;
        let now = Instant::now();

        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(members) = store.by_tag.get(tag) {
                keys.extend(members.iter().cloned());
            }
        }

        let mut removed = 0;
        for key in &keys {
            match store.remove(key) {
                Some(entry) if entry.expired(now) => {
                    self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                Some(_) => removed += 1,
                None => {}
            }
        }
        // Stale index sets (keys already gone) are dropped here too.
        for tag in tags {
            store.by_tag.remove(tag);
        }
        self.inner
            .stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(?tags, removed, "invalidated tags");
        Ok(removed)
    }

    #[instrument(name = "MemoryBackend::clear", skip(self))]
    pub fn clear(&self) -> Result<()> {
        let mut store = self.store()?;
        store.entries.clear();
        store.by_tag.clear();
        store.recency.clear();
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        let size = self
            .store()
            .map(|store| store.entries.len() as u64)
            .unwrap_or(0);
        self.inner.stats.snapshot(size)
    }

    #[instrument(name = "MemoryBackend::ttl", skip(self))]
    pub fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>> {
        let mut store = self.store()?;
        let now = Instant::now();
        let remaining = match store.entries.get(key.as_str()) {
            None => return Ok(None),
            Some(entry) if entry.expired(now) => None,
            Some(entry) => return Ok(entry.expires_at.map(|at| at - now)),
        };
        store.remove(key.as_str());
        self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
        Ok(remaining)
    }

    /// Spawn a background task that removes up to `batch` expired entries
    /// every `interval`.
    ///
    /// The task holds only a weak handle and exits once every clone of this
    /// backend has been dropped.
    pub fn spawn_sweeper(&self, interval: Duration, batch: usize) -> tokio::task::JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                let removed = sweep_expired(&inner, batch);
                if removed > 0 {
                    trace!(removed, "sweeper dropped expired entries");
                }
            }
        })
    }
}

fn sweep_expired(inner: &Inner, batch: usize) -> usize {
    let Ok(mut store) = inner.store.lock() else {
        return 0;
    };
    let now = Instant::now();
    let victims = store
        .entries
        .iter()
        .filter(|(_, entry)| entry.expired(now))
        .take(batch)
        .map(|(key, _)| key.clone())
        .collect::<Vec<_>>();
    let removed = victims.len();
    for key in victims {
        store.remove(&key);
    }
    inner
        .stats
        .evictions
        .fetch_add(removed as u64, Ordering::Relaxed);
    removed
}

impl Store {
    /// Remove an entry and every index that refers to it.
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        for tag in &entry.tags {
            if let Some(members) = self.by_tag.get_mut(tag) {
                members.remove(key);
                if members.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        Some(entry)
    }

    /// Bump an entry to most-recently-used and clone its value out.
    fn touch_and_read(&mut self, key: &str) -> Option<Vec<u8>> {
        self.clock += 1;
        let tick = self.clock;
        let entry = self.entries.get_mut(key)?;
        let old_tick = entry.tick;
        entry.tick = tick;
        let value = entry.value.clone();
        self.recency.remove(&old_tick);
        self.recency.insert(tick, key.to_string());
        Some(value)
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        MemoryBackend::get(self, key)
    }

    fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        MemoryBackend::set(self, key, value, ttl, tags)
    }

    fn delete(&self, key: &Fingerprint) -> Result<bool> {
        MemoryBackend::delete(self, key)
    }

    fn contains(&self, key: &Fingerprint) -> Result<bool> {
        MemoryBackend::contains(self, key)
    }

    fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize> {
        MemoryBackend::invalidate_tags(self, tags)
    }

    fn clear(&self) -> Result<()> {
        MemoryBackend::clear(self)
    }

    fn stats(&self) -> StatsSnapshot {
        MemoryBackend::stats(self)
    }

    fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>> {
        MemoryBackend::ttl(self, key)
    }
}

impl AsyncCacheBackend for MemoryBackend {
    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        MemoryBackend::get(self, key)
    }

    async fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        MemoryBackend::set(self, key, value, ttl, tags)
    }

    async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        MemoryBackend::delete(self, key)
    }

    async fn contains(&self, key: &Fingerprint) -> Result<bool> {
        MemoryBackend::contains(self, key)
    }

    async fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize> {
        MemoryBackend::invalidate_tags(self, tags)
    }

    async fn clear(&self) -> Result<()> {
        MemoryBackend::clear(self)
    }

    async fn stats(&self) -> StatsSnapshot {
        MemoryBackend::stats(self)
    }

    async fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>> {
        MemoryBackend::ttl(self, key)
    }
}

impl AdvisoryLock for MemoryBackend {
    fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .map_err(|_| Error::backend("lock", PoisonedLock))?;
        let now = Instant::now();
        match locks.get(name) {
            Some(held) if held.expires_at > now && held.owner != owner => Ok(false),
            _ => {
                locks.insert(
                    name.to_string(),
                    HeldLock {
                        owner: owner.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .map_err(|_| Error::backend("lock", PoisonedLock))?;
        match locks.get(name) {
            Some(held) if held.owner == owner => {
                locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl AsyncAdvisoryLock for MemoryBackend {
    async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        AdvisoryLock::try_acquire(self, name, owner, ttl)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        AdvisoryLock::release(self, name, owner)
    }
}
