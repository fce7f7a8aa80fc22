//! Cache backend abstraction layer.
//!
//! This module defines the backend contract that abstracts over cache
//! storage implementations, in two parallel surfaces:
//!
//! - [`CacheBackend`]: blocking operations for threaded callers
//! - [`AsyncCacheBackend`]: cooperative operations for async callers
//!
//! Two storage implementations are provided:
//!
//! - [`MemoryBackend`]: process-local store (implements both surfaces)
//! - [`RedisBackend`] / [`AsyncRedisBackend`]: the same contract over a
//!   remote redis server

mod contract;
pub mod memory;
pub mod redis;

pub use contract::{AsyncCacheBackend, CacheBackend, StatsSnapshot, Tag};
pub use memory::MemoryBackend;
pub use redis::{AsyncRedisBackend, RedisBackend};
