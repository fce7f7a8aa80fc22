//! Function-result caching with pluggable backends and singleflight.
//!
//! `relaycache` memoizes the results of effectively-pure computations. A
//! call is identified by a stable fingerprint built from an operation
//! identity plus canonicalized arguments; results are stored in a backend
//! with TTL and tag-based invalidation; concurrent callers of the same
//! fingerprint are coordinated so the computation runs at most once per
//! process — and, with distributed singleflight, at most once across
//! cooperating processes while the advisory lock holds.
//!
//! The crate exposes matching blocking and cooperative surfaces. The
//! in-memory backend serves both; the redis backends come in a blocking and
//! a managed-connection async flavor that share one persisted layout.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use relaycache::{Args, Cache, CallOptions, MemoryBackend, Tags};
//!
//! fn main() -> relaycache::Result<()> {
//!     let cache = Cache::new(MemoryBackend::default());
//!     let opts = CallOptions::builder()
//!         .ttl(Duration::from_secs(60))
//!         .tags(Tags::fixed(["math"]))
//!         .build();
//!
//!     let squared: i64 = cache.run("math.square", Args::new().arg(7), &opts, || Ok(49))?;
//!     assert_eq!(squared, 49);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod codec;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod lock;
pub mod pipeline;
pub mod singleflight;
pub mod value;

pub use backend::{
    AsyncCacheBackend, AsyncRedisBackend, CacheBackend, MemoryBackend, RedisBackend,
    StatsSnapshot, Tag,
};
pub use error::{BoxError, Error, Result};
pub use invalidation::{
    InvalidationReport, invalidate, invalidate_all, invalidate_all_async, invalidate_async,
};
pub use key::{Args, Fingerprint, KeyBuilder};
pub use lock::{AdvisoryLock, AsyncAdvisoryLock};
pub use pipeline::{Cache, CallOptions, KeyFn, TagFn, Tags};
pub use value::{CacheValue, Canonicalize};
