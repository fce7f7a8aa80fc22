//! Named advisory locks with owner tokens and TTL.
//!
//! The distributed singleflight path acquires an advisory lock before
//! computing, so at most one of N cooperating processes does the work while
//! the lock holds. The lock's TTL protects against a crashed holder; the
//! owner token prevents a waiter whose lock expired (and was re-acquired by
//! another party) from releasing someone else's lock.
//!
//! Acquisition with a wait budget is a poll loop over [`try_acquire`]
//! rather than a trait method, so every implementation gets the same
//! bounded-wait behavior.
//!
//! [`try_acquire`]: AdvisoryLock::try_acquire

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::Result;

/// How long to sleep between acquisition attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Blocking advisory lock surface.
pub trait AdvisoryLock: Clone + Send + Sync + 'static {
    /// Attempt to take the lock without waiting.
    ///
    /// Returns `true` when the lock was free or already held by `owner`
    /// (which refreshes the TTL).
    fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock if and only if it is still held by `owner`.
    ///
    /// Returns whether the lock was released.
    fn release(&self, name: &str, owner: &str) -> Result<bool>;
}

/// Cooperative advisory lock surface.
pub trait AsyncAdvisoryLock: Clone + Send + Sync + 'static {
    fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn release(&self, name: &str, owner: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Acquire `name` for `owner`, waiting up to `wait_timeout`.
///
/// Returns `false` when the wait budget runs out without acquisition.
pub fn acquire<L: AdvisoryLock>(
    lock: &L,
    name: &str,
    owner: &str,
    ttl: Duration,
    wait_timeout: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + wait_timeout;
    loop {
        if lock.try_acquire(name, owner, ttl)? {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        std::thread::sleep(remaining.min(POLL_INTERVAL));
    }
}

/// Cooperative variant of [`acquire`].
pub async fn acquire_async<L: AsyncAdvisoryLock>(
    lock: &L,
    name: &str,
    owner: &str,
    ttl: Duration,
    wait_timeout: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + wait_timeout;
    loop {
        if lock.try_acquire(name, owner, ttl).await? {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
    }
}
