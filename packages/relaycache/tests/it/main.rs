use std::time::Duration;

use relaycache::{
    AsyncAdvisoryLock, AsyncCacheBackend, Error, Fingerprint, Result, StatsSnapshot, Tag,
};

pub mod pipeline;
pub mod redis;

/// A backend whose transport is always down, for degraded-path tests.
#[derive(Clone, Debug, Default)]
pub struct DownBackend;

#[derive(Debug, thiserror::Error)]
#[error("transport down")]
struct Down;

impl AsyncCacheBackend for DownBackend {
    async fn get(&self, _key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        Err(Error::backend("get", Down))
    }

    async fn set(
        &self,
        _key: &Fingerprint,
        _value: &[u8],
        _ttl: Option<Duration>,
        _tags: &[Tag],
    ) -> Result<()> {
        Err(Error::backend("set", Down))
    }

    async fn delete(&self, _key: &Fingerprint) -> Result<bool> {
        Err(Error::backend("delete", Down))
    }

    async fn contains(&self, _key: &Fingerprint) -> Result<bool> {
        Err(Error::backend("contains", Down))
    }

    async fn invalidate_tags(&self, _tags: &[Tag]) -> Result<usize> {
        Err(Error::backend("invalidate_tags", Down))
    }

    async fn clear(&self) -> Result<()> {
        Err(Error::backend("clear", Down))
    }

    async fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::default()
    }

    async fn ttl(&self, _key: &Fingerprint) -> Result<Option<Duration>> {
        Err(Error::backend("ttl", Down))
    }
}

impl AsyncAdvisoryLock for DownBackend {
    async fn try_acquire(&self, name: &str, _owner: &str, _ttl: Duration) -> Result<bool> {
        Err(Error::lock(name, Down))
    }

    async fn release(&self, name: &str, _owner: &str) -> Result<bool> {
        Err(Error::lock(name, Down))
    }
}
