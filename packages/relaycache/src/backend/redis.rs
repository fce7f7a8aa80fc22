//! Remote cache backend over a redis server.
//!
//! Two implementations share one key layout:
//!
//! - [`RedisBackend`]: blocking, over a [`redis::Connection`]
//! - [`AsyncRedisBackend`]: cooperative, over a
//!   [`redis::aio::ConnectionManager`]
//!
//! ## Persisted layout
//!
//! Everything lives under two configured prefixes, and any implementation
//! claiming interoperability must follow this layout exactly:
//!
//! - `{value_prefix}{key}` → value bytes, with the TTL on the key itself
//! - `{meta_prefix}:k:{key}` → SET of tag names for the key
//! - `{meta_prefix}:t:{tag}` → SET of keys carrying the tag
//! - `{meta_prefix}:lock:{name}` → advisory lock owner token
//!
//! Per-tag sets carry no TTL of their own; stale members (keys that have
//! since expired) are tolerated and pruned during invalidation. `set` runs
//! as a MULTI/EXEC pipeline; `invalidate_tags` and lock release run as Lua
//! scripts so they are atomic with respect to other commands. If the
//! transport loses atomicity mid-flight, residual entries are tolerated and
//! the next invalidation makes progress.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use bon::bon;
use derive_more::Debug;
use redis::Script;
use tracing::{debug, instrument, warn};

use super::contract::{AsyncCacheBackend, CacheBackend, Stats, StatsSnapshot, Tag};
use crate::error::{Error, PoisonedLock, Result};
use crate::key::Fingerprint;
use crate::lock::{AdvisoryLock, AsyncAdvisoryLock};

/// Atomically delete everything reachable from a set of tags.
///
/// `ARGV[1]` = value prefix, `ARGV[2]` = meta prefix, `ARGV[3..]` = tags.
/// Returns the number of value keys that actually existed.
static INVALIDATE_TAGS: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local value_prefix = ARGV[1]
local meta_prefix = ARGV[2]
local removed = 0
local seen = {}
for i = 3, #ARGV do
    local tag = ARGV[i]
    local tag_set = meta_prefix .. ':t:' .. tag
    local members = redis.call('SMEMBERS', tag_set)
    for _, key in ipairs(members) do
        if not seen[key] then
            seen[key] = true
            removed = removed + redis.call('DEL', value_prefix .. key)
            local key_tags = meta_prefix .. ':k:' .. key
            local tags_of_key = redis.call('SMEMBERS', key_tags)
            redis.call('DEL', key_tags)
            for _, other in ipairs(tags_of_key) do
                redis.call('SREM', meta_prefix .. ':t:' .. other, key)
            end
        end
    end
    redis.call('DEL', tag_set)
end
return removed
"#,
    )
});

/// Take or refresh an advisory lock.
///
/// `KEYS[1]` = lock key, `ARGV[1]` = owner token, `ARGV[2]` = TTL millis.
static ACQUIRE_LOCK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local current = redis.call('GET', KEYS[1])
if current == false then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return 1
elseif current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#,
    )
});

/// Release an advisory lock only if still held by the given owner.
///
/// `KEYS[1]` = lock key, `ARGV[1]` = owner token.
static RELEASE_LOCK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#,
    )
});

/// Key layout shared by both redis backends.
#[derive(Clone, Debug)]
struct Layout {
    value_prefix: String,
    meta_prefix: String,
}

impl Layout {
    fn value_key(&self, key: &str) -> String {
        format!("{}{key}", self.value_prefix)
    }

    fn key_tags_key(&self, key: &str) -> String {
        format!("{}:k:{key}", self.meta_prefix)
    }

    fn tag_keys_key(&self, tag: &str) -> String {
        format!("{}:t:{tag}", self.meta_prefix)
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}:lock:{name}", self.meta_prefix)
    }

    fn value_pattern(&self) -> String {
        format!("{}*", self.value_prefix)
    }

    fn meta_pattern(&self) -> String {
        format!("{}:*", self.meta_prefix)
    }
}

/// TTL in whole milliseconds, clamped away from zero since redis rejects
/// `PX 0`.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Build the transactional write for `set`: store the value, rewrite the
/// per-key tag list, and adjust per-tag sets by the diff against the old
/// tag set.
fn build_set_pipe(
    layout: &Layout,
    key: &str,
    value: &[u8],
    ttl: Option<Duration>,
    tags: &[Tag],
    old_tags: &HashSet<String>,
) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();

    let value_key = layout.value_key(key);
    match ttl {
        Some(ttl) => {
            pipe.cmd("SET")
                .arg(&value_key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .ignore();
        }
        None => {
            pipe.cmd("SET").arg(&value_key).arg(value).ignore();
        }
    }

    let key_tags = layout.key_tags_key(key);
    pipe.cmd("DEL").arg(&key_tags).ignore();
    if !tags.is_empty() {
        pipe.cmd("SADD").arg(&key_tags);
        for tag in tags {
            pipe.arg(tag.as_str());
        }
        pipe.ignore();
    }

    for tag in tags {
        if !old_tags.contains(tag.as_str()) {
            pipe.cmd("SADD")
                .arg(layout.tag_keys_key(tag.as_str()))
                .arg(key)
                .ignore();
        }
    }
    for old in old_tags {
        if !tags.iter().any(|tag| tag.as_str() == old) {
            pipe.cmd("SREM")
                .arg(layout.tag_keys_key(old))
                .arg(key)
                .ignore();
        }
    }
    pipe
}

/// Interpret a PTTL reply.
fn remaining_from_pttl(pttl: i64) -> Option<Duration> {
    if pttl >= 0 {
        Some(Duration::from_millis(pttl as u64))
    } else {
        // -2 missing key, -1 no expiry.
        None
    }
}

/// Blocking cache backend over a redis connection.
///
/// Cheaply cloneable; clones share the connection and counters. Mirrors the
/// cooperative [`AsyncRedisBackend`] operation for operation.
#[derive(Clone, Debug)]
pub struct RedisBackend {
    #[debug(skip)]
    con: Arc<Mutex<redis::Connection>>,
    layout: Layout,
    default_ttl: Option<Duration>,
    #[debug(skip)]
    stats: Arc<Stats>,
}

#[bon]
impl RedisBackend {
    /// Connect to a redis server.
    ///
    /// `value_prefix` and `meta_prefix` carve out this backend's slice of
    /// the key space; `clear` never touches keys outside them.
    /// `response_timeout` bounds every operation; a timed-out read surfaces
    /// as a backend error, which the pipeline treats as a miss.
    #[builder]
    pub fn new(
        url: &str,
        default_ttl: Option<Duration>,
        response_timeout: Option<Duration>,
        #[builder(into, default = "rc:".to_string())] value_prefix: String,
        #[builder(into, default = "rcmeta".to_string())] meta_prefix: String,
    ) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::backend("connect", e))?;
        let con = client
            .get_connection()
            .map_err(|e| Error::backend("connect", e))?;
        if let Some(timeout) = response_timeout {
            con.set_read_timeout(Some(timeout))
                .map_err(|e| Error::backend("connect", e))?;
            con.set_write_timeout(Some(timeout))
                .map_err(|e| Error::backend("connect", e))?;
        }
        Ok(Self {
            con: Arc::new(Mutex::new(con)),
            layout: Layout {
                value_prefix,
                meta_prefix,
            },
            default_ttl,
            stats: Arc::new(Stats::default()),
        })
    }
}

impl RedisBackend {
    fn con(&self) -> Result<MutexGuard<'_, redis::Connection>> {
        self.con
            .lock()
            .map_err(|_| Error::backend("lock", PoisonedLock))
    }

    #[instrument(name = "RedisBackend::get", skip(self))]
    pub fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let mut con = self.con()?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.layout.value_key(key.as_str()))
            .query(&mut *con)
            .map_err(|e| Error::backend("get", e))?;
        if value.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    #[instrument(name = "RedisBackend::set", skip(self, value))]
    pub fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        let ttl = ttl.or(self.default_ttl);
        let mut con = self.con()?;
        let old_tags: HashSet<String> = redis::cmd("SMEMBERS")
            .arg(self.layout.key_tags_key(key.as_str()))
            .query(&mut *con)
            .map_err(|e| Error::backend("set", e))?;
        build_set_pipe(&self.layout, key.as_str(), value, ttl, tags, &old_tags)
            .query::<()>(&mut *con)
            .map_err(|e| Error::backend("set", e))?;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[instrument(name = "RedisBackend::delete", skip(self))]
    pub fn delete(&self, key: &Fingerprint) -> Result<bool> {
        let mut con = self.con()?;
        let tags: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.layout.key_tags_key(key.as_str()))
            .query(&mut *con)
            .map_err(|e| Error::backend("delete", e))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("DEL").arg(self.layout.value_key(key.as_str()));
        pipe.cmd("DEL")
            .arg(self.layout.key_tags_key(key.as_str()))
            .ignore();
        for tag in &tags {
            pipe.cmd("SREM")
                .arg(self.layout.tag_keys_key(tag))
                .arg(key.as_str())
                .ignore();
        }
        let (removed,): (i64,) = pipe
            .query(&mut *con)
            .map_err(|e| Error::backend("delete", e))?;
        Ok(removed > 0)
    }

    #[instrument(name = "RedisBackend::contains", skip(self))]
    pub fn contains(&self, key: &Fingerprint) -> Result<bool> {
        let mut con = self.con()?;
        redis::cmd("EXISTS")
            .arg(self.layout.value_key(key.as_str()))
            .query(&mut *con)
            .map_err(|e| Error::backend("contains", e))
    }

    #[instrument(name = "RedisBackend::invalidate_tags", skip(self))]
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let mut con = self.con()?;
        let mut invocation = INVALIDATE_TAGS.prepare_invoke();
        invocation
            .arg(&self.layout.value_prefix)
            .arg(&self.layout.meta_prefix);
        for tag in tags {
            invocation.arg(tag.as_str());
        }
        let removed: usize = invocation
            .invoke(&mut *con)
            .map_err(|e| Error::backend("invalidate_tags", e))?;
        self.stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(?tags, removed, "invalidated tags");
        Ok(removed)
    }

    #[instrument(name = "RedisBackend::clear", skip(self))]
    pub fn clear(&self) -> Result<()> {
        let mut con = self.con()?;
        scan_delete(&mut con, &self.layout.value_pattern())
            .map_err(|e| Error::backend("clear", e))?;
        scan_delete(&mut con, &self.layout.meta_pattern())
            .map_err(|e| Error::backend("clear", e))?;
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        let size = self
            .con()
            .and_then(|mut con| {
                scan_count(&mut con, &self.layout.value_pattern())
                    .map_err(|e| Error::backend("stats", e))
            })
            .unwrap_or_else(|err| {
                warn!(?err, "stats size scan failed");
                0
            });
        self.stats.snapshot(size)
    }

    #[instrument(name = "RedisBackend::ttl", skip(self))]
    pub fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>> {
        let mut con = self.con()?;
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.layout.value_key(key.as_str()))
            .query(&mut *con)
            .map_err(|e| Error::backend("ttl", e))?;
        Ok(remaining_from_pttl(pttl))
    }
}

fn scan_delete(con: &mut redis::Connection, pattern: &str) -> redis::RedisResult<u64> {
    let mut cursor: u64 = 0;
    let mut deleted = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(500)
            .query(&mut *con)?;
        if !keys.is_empty() {
            deleted += redis::cmd("DEL").arg(&keys).query::<u64>(&mut *con)?;
        }
        cursor = next;
        if cursor == 0 {
            return Ok(deleted);
        }
    }
}

fn scan_count(con: &mut redis::Connection, pattern: &str) -> redis::RedisResult<u64> {
    let mut cursor: u64 = 0;
    let mut count = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(500)
            .query(&mut *con)?;
        count += keys.len() as u64;
        cursor = next;
        if cursor == 0 {
            return Ok(count);
        }
    }
}

impl CacheBackend for RedisBackend {
    fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        RedisBackend::get(self, key)
    }

    fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        RedisBackend::set(self, key, value, ttl, tags)
    }

    fn delete(&self, key: &Fingerprint) -> Result<bool> {
        RedisBackend::delete(self, key)
    }

    fn contains(&self, key: &Fingerprint) -> Result<bool> {
        RedisBackend::contains(self, key)
    }

    fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize> {
        RedisBackend::invalidate_tags(self, tags)
    }

    fn clear(&self) -> Result<()> {
        RedisBackend::clear(self)
    }

    fn stats(&self) -> StatsSnapshot {
        RedisBackend::stats(self)
    }

    fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>> {
        RedisBackend::ttl(self, key)
    }
}

impl AdvisoryLock for RedisBackend {
    fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut con = self.con.lock().map_err(|_| Error::lock(name, PoisonedLock))?;
        let taken: i64 = ACQUIRE_LOCK
            .key(self.layout.lock_key(name))
            .arg(owner)
            .arg(ttl_millis(ttl))
            .invoke(&mut *con)
            .map_err(|e| Error::lock(name, e))?;
        Ok(taken == 1)
    }

    fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let mut con = self.con.lock().map_err(|_| Error::lock(name, PoisonedLock))?;
        let released: i64 = RELEASE_LOCK
            .key(self.layout.lock_key(name))
            .arg(owner)
            .invoke(&mut *con)
            .map_err(|e| Error::lock(name, e))?;
        Ok(released == 1)
    }
}

/// Cooperative cache backend over a managed redis connection.
///
/// The connection manager multiplexes one connection and reconnects on
/// failure; clones of this backend share it.
#[derive(Clone, Debug)]
pub struct AsyncRedisBackend {
    #[debug(skip)]
    manager: redis::aio::ConnectionManager,
    layout: Layout,
    default_ttl: Option<Duration>,
    #[debug(skip)]
    stats: Arc<Stats>,
}

#[bon]
impl AsyncRedisBackend {
    /// Connect to a redis server.
    ///
    /// See [`RedisBackend::new`] for the prefix semantics; the two backends
    /// configured identically are interoperable.
    #[builder]
    pub async fn new(
        url: &str,
        default_ttl: Option<Duration>,
        response_timeout: Option<Duration>,
        #[builder(into, default = "rc:".to_string())] value_prefix: String,
        #[builder(into, default = "rcmeta".to_string())] meta_prefix: String,
    ) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::backend("connect", e))?;
        let mut config = redis::aio::ConnectionManagerConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        let manager = redis::aio::ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|e| Error::backend("connect", e))?;
        Ok(Self {
            manager,
            layout: Layout {
                value_prefix,
                meta_prefix,
            },
            default_ttl,
            stats: Arc::new(Stats::default()),
        })
    }
}

impl AsyncRedisBackend {
    #[instrument(name = "AsyncRedisBackend::get", skip(self))]
    pub async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let mut con = self.manager.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.layout.value_key(key.as_str()))
            .query_async(&mut con)
            .await
            .map_err(|e| Error::backend("get", e))?;
        if value.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    #[instrument(name = "AsyncRedisBackend::set", skip(self, value))]
    pub async fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        let ttl = ttl.or(self.default_ttl);
        let mut con = self.manager.clone();
        let old_tags: HashSet<String> = redis::cmd("SMEMBERS")
            .arg(self.layout.key_tags_key(key.as_str()))
            .query_async(&mut con)
            .await
            .map_err(|e| Error::backend("set", e))?;
        build_set_pipe(&self.layout, key.as_str(), value, ttl, tags, &old_tags)
            .query_async::<()>(&mut con)
            .await
            .map_err(|e| Error::backend("set", e))?;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[instrument(name = "AsyncRedisBackend::delete", skip(self))]
    pub async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        let mut con = self.manager.clone();
        let tags: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.layout.key_tags_key(key.as_str()))
            .query_async(&mut con)
            .await
            .map_err(|e| Error::backend("delete", e))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("DEL").arg(self.layout.value_key(key.as_str()));
        pipe.cmd("DEL")
            .arg(self.layout.key_tags_key(key.as_str()))
            .ignore();
        for tag in &tags {
            pipe.cmd("SREM")
                .arg(self.layout.tag_keys_key(tag))
                .arg(key.as_str())
                .ignore();
        }
        let (removed,): (i64,) = pipe
            .query_async(&mut con)
            .await
            .map_err(|e| Error::backend("delete", e))?;
        Ok(removed > 0)
    }

    #[instrument(name = "AsyncRedisBackend::contains", skip(self))]
    pub async fn contains(&self, key: &Fingerprint) -> Result<bool> {
        let mut con = self.manager.clone();
        redis::cmd("EXISTS")
            .arg(self.layout.value_key(key.as_str()))
            .query_async(&mut con)
            .await
            .map_err(|e| Error::backend("contains", e))
    }

    #[instrument(name = "AsyncRedisBackend::invalidate_tags", skip(self))]
    pub async fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let mut con = self.manager.clone();
        let mut invocation = INVALIDATE_TAGS.prepare_invoke();
        invocation
            .arg(&self.layout.value_prefix)
            .arg(&self.layout.meta_prefix);
        for tag in tags {
            invocation.arg(tag.as_str());
        }
        let removed: usize = invocation
            .invoke_async(&mut con)
            .await
            .map_err(|e| Error::backend("invalidate_tags", e))?;
        self.stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(?tags, removed, "invalidated tags");
        Ok(removed)
    }

    #[instrument(name = "AsyncRedisBackend::clear", skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let mut con = self.manager.clone();
        scan_delete_async(&mut con, &self.layout.value_pattern())
            .await
            .map_err(|e| Error::backend("clear", e))?;
        scan_delete_async(&mut con, &self.layout.meta_pattern())
            .await
            .map_err(|e| Error::backend("clear", e))?;
        Ok(())
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let mut con = self.manager.clone();
        let size = match scan_count_async(&mut con, &self.layout.value_pattern()).await {
            Ok(size) => size,
            Err(err) => {
                warn!(?err, "stats size scan failed");
                0
            }
        };
        self.stats.snapshot(size)
    }

    #[instrument(name = "AsyncRedisBackend::ttl", skip(self))]
    pub async fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>> {
        let mut con = self.manager.clone();
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.layout.value_key(key.as_str()))
            .query_async(&mut con)
            .await
            .map_err(|e| Error::backend("ttl", e))?;
        Ok(remaining_from_pttl(pttl))
    }
}

async fn scan_delete_async(
    con: &mut redis::aio::ConnectionManager,
    pattern: &str,
) -> redis::RedisResult<u64> {
    let mut cursor: u64 = 0;
    let mut deleted = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(500)
            .query_async(con)
            .await?;
        if !keys.is_empty() {
            deleted += redis::cmd("DEL").arg(&keys).query_async::<u64>(con).await?;
        }
        cursor = next;
        if cursor == 0 {
            return Ok(deleted);
        }
    }
}

async fn scan_count_async(
    con: &mut redis::aio::ConnectionManager,
    pattern: &str,
) -> redis::RedisResult<u64> {
    let mut cursor: u64 = 0;
    let mut count = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(500)
            .query_async(con)
            .await?;
        count += keys.len() as u64;
        cursor = next;
        if cursor == 0 {
            return Ok(count);
        }
    }
}

impl AsyncCacheBackend for AsyncRedisBackend {
    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        AsyncRedisBackend::get(self, key).await
    }

    async fn set(
        &self,
        key: &Fingerprint,
        value: &[u8],
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        AsyncRedisBackend::set(self, key, value, ttl, tags).await
    }

    async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        AsyncRedisBackend::delete(self, key).await
    }

    async fn contains(&self, key: &Fingerprint) -> Result<bool> {
        AsyncRedisBackend::contains(self, key).await
    }

    async fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize> {
        AsyncRedisBackend::invalidate_tags(self, tags).await
    }

    async fn clear(&self) -> Result<()> {
        AsyncRedisBackend::clear(self).await
    }

    async fn stats(&self) -> StatsSnapshot {
        AsyncRedisBackend::stats(self).await
    }

    async fn ttl(&self, key: &Fingerprint) -> Result<Option<Duration>> {
        AsyncRedisBackend::ttl(self, key).await
    }
}

impl AsyncAdvisoryLock for AsyncRedisBackend {
    async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut con = self.manager.clone();
        let taken: i64 = ACQUIRE_LOCK
            .key(self.layout.lock_key(name))
            .arg(owner)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut con)
            .await
            .map_err(|e| Error::lock(name, e))?;
        Ok(taken == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let mut con = self.manager.clone();
        let released: i64 = RELEASE_LOCK
            .key(self.layout.lock_key(name))
            .arg(owner)
            .invoke_async(&mut con)
            .await
            .map_err(|e| Error::lock(name, e))?;
        Ok(released == 1)
    }
}
