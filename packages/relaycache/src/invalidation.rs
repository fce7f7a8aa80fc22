//! Key-scoped and tag-scoped purging.
//!
//! Thin helpers over the backend contract so callers can evict without
//! going through the invocation pipeline. `keys` and `tags` may both be
//! given; both are processed.

use tracing::instrument;

use crate::backend::{AsyncCacheBackend, CacheBackend, Tag};
use crate::error::Result;
use crate::key::Fingerprint;

/// What an [`invalidate`] call removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Keys deleted by direct addressing.
    pub keys_deleted: usize,
    /// Entries removed through tag invalidation.
    pub entries_invalidated: usize,
}

/// Purge specific keys and/or tags from a backend.
#[instrument(name = "invalidate", skip(backend))]
pub fn invalidate<B: CacheBackend>(
    backend: &B,
    keys: &[Fingerprint],
    tags: &[Tag],
) -> Result<InvalidationReport> {
    let mut report = InvalidationReport::default();
    for key in keys {
        if backend.delete(key)? {
            report.keys_deleted += 1;
        }
    }
    if !tags.is_empty() {
        report.entries_invalidated = backend.invalidate_tags(tags)?;
    }
    Ok(report)
}

/// Remove everything the backend owns under its configured prefix.
pub fn invalidate_all<B: CacheBackend>(backend: &B) -> Result<()> {
    backend.clear()
}

/// Cooperative variant of [`invalidate`].
#[instrument(name = "invalidate_async", skip(backend))]
pub async fn invalidate_async<B: AsyncCacheBackend>(
    backend: &B,
    keys: &[Fingerprint],
    tags: &[Tag],
) -> Result<InvalidationReport> {
    let mut report = InvalidationReport::default();
    for key in keys {
        if backend.delete(key).await? {
            report.keys_deleted += 1;
        }
    }
    if !tags.is_empty() {
        report.entries_invalidated = backend.invalidate_tags(tags).await?;
    }
    Ok(report)
}

/// Cooperative variant of [`invalidate_all`].
pub async fn invalidate_all_async<B: AsyncCacheBackend>(backend: &B) -> Result<()> {
    backend.clear().await
}
