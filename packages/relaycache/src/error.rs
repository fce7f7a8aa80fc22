//! Error types for relaycache.
//!
//! The error kinds here are load-bearing: the invocation pipeline recovers
//! from some of them (a backend read failure is a miss, a lock failure means
//! computing without cross-process dedup) and propagates others (a key that
//! cannot be built, a failed user computation). Callers that need to
//! distinguish outcomes match on the variant.
//!
//! All variants are cheaply cloneable. A singleflight leader resolves its
//! in-flight group with a single result, and every waiter receives a clone
//! of it, so sources are stored behind `Arc`.

use std::sync::Arc;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type a user computation is allowed to return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An argument has no canonical form, so no stable cache key exists.
    ///
    /// The user computation is never invoked in this case; fix the argument
    /// or supply a custom key function.
    #[error("cannot build a cache key from a value of type `{type_tag}`")]
    Unhashable { type_tag: String },

    /// The backend transport failed.
    ///
    /// The pipeline treats this as a miss on reads and logs-and-drops on
    /// writes, so it normally never surfaces from a cached call. It does
    /// surface from direct backend operations such as invalidation.
    #[error("cache backend operation `{op}` failed")]
    Backend {
        op: &'static str,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A stored entry could not be decoded.
    ///
    /// Treated as a miss; the entry is deleted best-effort.
    #[error("corrupt cache entry `{key}`")]
    Corrupt {
        key: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The distributed lock service failed.
    ///
    /// The pipeline degrades safely: it computes without the cross-process
    /// guarantee.
    #[error("distributed lock `{name}` unavailable")]
    LockUnavailable {
        name: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// The user computation failed.
    ///
    /// Propagated to the caller and to every waiter of the same singleflight
    /// group; never cached.
    #[error("cached computation failed")]
    User(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

/// Marker for a poisoned internal mutex, surfaced as [`Error::Backend`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("internal mutex poisoned")]
pub(crate) struct PoisonedLock;

impl Error {
    /// Wrap a transport error from a backend operation.
    pub fn backend(op: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend {
            op,
            source: Arc::new(source),
        }
    }

    /// Wrap a user computation error.
    pub fn user(source: BoxError) -> Self {
        Self::User(Arc::from(source))
    }

    /// Wrap a lock service error.
    pub fn lock(name: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::LockUnavailable {
            name: name.into(),
            source: Arc::new(source),
        }
    }
}
