//! The invocation pipeline: key → lookup → coordinate → compute → store.
//!
//! [`Cache`] wires the key builder, a backend, and the singleflight
//! coordinators into one cached-call surface, in two variants:
//!
//! - [`Cache::run`]: blocking, for threaded callers
//! - [`Cache::run_async`]: cooperative, for async callers
//!
//! A cached call proceeds as: build the fingerprint, try the backend, and
//! on a miss enter the local singleflight group. The group leader re-checks
//! the backend (another flight or process may just have published), then —
//! with distributed singleflight enabled — takes the backend's advisory
//! lock before computing, stores the encoded result with its tags, and
//! publishes to the waiters.
//!
//! The cache is a best-effort overlay: backend read failures are treated as
//! misses, write failures are logged and dropped, and lock failures degrade
//! to computing without cross-process dedup. Only key-building errors and
//! errors from the user computation propagate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use derive_more::Debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::backend::{AsyncCacheBackend, CacheBackend, StatsSnapshot, Tag};
use crate::codec;
use crate::error::{BoxError, Error, Result};
use crate::key::{Args, Fingerprint, KeyBuilder};
use crate::lock::{self, AdvisoryLock, AsyncAdvisoryLock};
use crate::singleflight::{AsyncSingleflight, Singleflight};

/// Replaces key building for one call; receives the call's arguments.
pub type KeyFn = Arc<dyn Fn(&Args) -> String + Send + Sync>;

/// Derives the tag set for one call from its arguments.
pub type TagFn = Arc<dyn Fn(&Args) -> Vec<Tag> + Send + Sync>;

/// How the tags of a stored entry are produced.
#[derive(Clone, Default)]
pub enum Tags {
    #[default]
    None,
    /// The same tags for every call.
    Static(Vec<Tag>),
    /// Tags derived from the call's arguments.
    Derive(TagFn),
}

impl Tags {
    pub fn fixed<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        Self::Static(tags.into_iter().map(Into::into).collect())
    }

    pub fn derive(f: impl Fn(&Args) -> Vec<Tag> + Send + Sync + 'static) -> Self {
        Self::Derive(Arc::new(f))
    }

    fn resolve(&self, args: &Args) -> Vec<Tag> {
        match self {
            Self::None => Vec::new(),
            Self::Static(tags) => tags.clone(),
            Self::Derive(f) => f(args),
        }
    }
}

impl std::fmt::Debug for Tags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("Tags::None"),
            Self::Static(tags) => f.debug_tuple("Tags::Static").field(tags).finish(),
            Self::Derive(_) => f.write_str("Tags::Derive(..)"),
        }
    }
}

const DEFAULT_DIST_LOCK_TTL: Duration = Duration::from_secs(30);
const DEFAULT_DIST_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call configuration.
#[derive(Clone, Debug, Builder)]
pub struct CallOptions {
    /// Entry lifetime. `None` uses the backend default; zero disables
    /// caching for the call entirely.
    pub ttl: Option<Duration>,

    /// Tags attached to the stored entry, for bulk invalidation.
    #[builder(default)]
    pub tags: Tags,

    /// Custom key function; bypasses argument canonicalization.
    #[debug(skip)]
    pub key: Option<KeyFn>,

    /// Extra namespace segment inserted into built keys.
    #[builder(into)]
    pub extra_namespace: Option<String>,

    /// Extend singleflight across processes via the backend's advisory
    /// lock.
    #[builder(default)]
    pub distributed: bool,

    /// How long a distributed lock protects against a crashed holder.
    #[builder(default = DEFAULT_DIST_LOCK_TTL)]
    pub dist_lock_ttl: Duration,

    /// How long to wait for the distributed lock before degrading.
    #[builder(default = DEFAULT_DIST_LOCK_TIMEOUT)]
    pub dist_lock_timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A caching pipeline bound to one backend.
///
/// Cheaply cloneable; clones share the backend and the singleflight
/// coordinators, so concurrent calls through any clone are deduplicated.
#[derive(Clone, Debug)]
pub struct Cache<B> {
    backend: B,
    keys: KeyBuilder,
    #[debug(skip)]
    flight: Arc<Singleflight>,
    #[debug(skip)]
    async_flight: Arc<AsyncSingleflight>,
}

impl<B> Cache<B> {
    pub fn new(backend: B) -> Self {
        Self::with_key_builder(backend, KeyBuilder::default())
    }

    pub fn with_key_builder(backend: B, keys: KeyBuilder) -> Self {
        Self {
            backend,
            keys,
            flight: Arc::new(Singleflight::new()),
            async_flight: Arc::new(AsyncSingleflight::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn fingerprint(&self, identity: &str, args: &Args, opts: &CallOptions) -> Result<Fingerprint> {
        match &opts.key {
            Some(key_fn) => Ok(self.keys.user_key(&key_fn(args))),
            None => self.keys.build(identity, args, opts.extra_namespace.as_deref()),
        }
    }
}

impl<B: AsyncCacheBackend + AsyncAdvisoryLock> Cache<B> {
    /// Run a cached call on the cooperative surface.
    ///
    /// `identity` names the operation (a qualified function name or other
    /// stable id); together with `args` it determines the fingerprint.
    /// `compute` runs only when no live entry exists and this caller wins
    /// the singleflight election.
    #[instrument(name = "Cache::run_async", skip(self, args, opts, compute))]
    pub async fn run_async<T, F, Fut>(
        &self,
        identity: &str,
        args: Args,
        opts: &CallOptions,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let key = self.fingerprint(identity, &args, opts)?;

        if opts.ttl == Some(Duration::ZERO) {
            return compute().await.map_err(Error::user);
        }

        match self.backend.get(&key).await {
            Ok(Some(bytes)) => match codec::decode(key.as_str(), &bytes) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(%key, ?err, "dropping undecodable entry");
                    if let Err(err) = self.backend.delete(&key).await {
                        warn!(%key, ?err, "failed to drop undecodable entry");
                    }
                }
            },
            Ok(None) => {}
            Err(err) => warn!(%key, ?err, "backend read failed; treating as miss"),
        }

        let bytes = self
            .async_flight
            .run(key.as_str(), || {
                self.lead_async(&key, &args, opts, compute)
            })
            .await?;
        codec::decode(key.as_str(), &bytes)
    }

    /// The leader's path through a singleflight group.
    async fn lead_async<T, F, Fut>(
        &self,
        key: &Fingerprint,
        args: &Args,
        opts: &CallOptions,
        compute: F,
    ) -> Result<Vec<u8>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        // Double-check: another flight may have published between our miss
        // and winning the election.
        if let Some(bytes) = self.read_fresh(key).await {
            return Ok(bytes);
        }

        let mut held: Option<String> = None;
        if opts.distributed {
            let owner = Uuid::new_v4().to_string();
            let recheck = match lock::acquire_async(
                &self.backend,
                key.as_str(),
                &owner,
                opts.dist_lock_ttl,
                opts.dist_lock_timeout,
            )
            .await
            {
                Ok(true) => {
                    held = Some(owner);
                    true
                }
                Ok(false) => {
                    debug!(%key, "lock wait timed out; computing without distributed dedup");
                    true
                }
                Err(err) => {
                    warn!(%key, ?err, "distributed lock unavailable; computing without it");
                    false
                }
            };
            // The holder we waited on may have published a value.
            if recheck {
                if let Some(bytes) = self.read_fresh(key).await {
                    self.release_held(key, held.take()).await;
                    return Ok(bytes);
                }
            }
        }

        let outcome = match compute().await.map_err(Error::user) {
            Ok(value) => match codec::encode(&value) {
                Ok(bytes) => {
                    let tags = opts.tags.resolve(args);
                    if let Err(err) = self.backend.set(key, &bytes, opts.ttl, &tags).await {
                        warn!(%key, ?err, "backend write failed; returning uncached value");
                    }
                    Ok(bytes)
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        self.release_held(key, held).await;
        outcome
    }

    async fn read_fresh(&self, key: &Fingerprint) -> Option<Vec<u8>> {
        match self.backend.get(key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(%key, ?err, "backend re-check failed; treating as miss");
                None
            }
        }
    }

    async fn release_held(&self, key: &Fingerprint, owner: Option<String>) {
        let Some(owner) = owner else { return };
        if let Err(err) = AsyncAdvisoryLock::release(&self.backend, key.as_str(), &owner).await {
            warn!(%key, ?err, "failed to release distributed lock");
        }
    }
}

impl<B: CacheBackend + AdvisoryLock> Cache<B> {
    /// Run a cached call on the blocking surface.
    ///
    /// Semantically identical to [`Cache::run_async`]; transport boundaries
    /// and the singleflight wait block the calling thread instead of
    /// suspending.
    #[instrument(name = "Cache::run", skip(self, args, opts, compute))]
    pub fn run<T, F>(&self, identity: &str, args: Args, opts: &CallOptions, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, BoxError>,
    {
        let key = self.fingerprint(identity, &args, opts)?;

        if opts.ttl == Some(Duration::ZERO) {
            return compute().map_err(Error::user);
        }

        match self.backend.get(&key) {
            Ok(Some(bytes)) => match codec::decode(key.as_str(), &bytes) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(%key, ?err, "dropping undecodable entry");
                    if let Err(err) = self.backend.delete(&key) {
                        warn!(%key, ?err, "failed to drop undecodable entry");
                    }
                }
            },
            Ok(None) => {}
            Err(err) => warn!(%key, ?err, "backend read failed; treating as miss"),
        }

        let bytes = self
            .flight
            .run(key.as_str(), || self.lead(&key, &args, opts, compute))?;
        codec::decode(key.as_str(), &bytes)
    }

    fn lead<T, F>(
        &self,
        key: &Fingerprint,
        args: &Args,
        opts: &CallOptions,
        compute: F,
    ) -> Result<Vec<u8>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, BoxError>,
    {
        if let Some(bytes) = self.read_fresh_blocking(key) {
            return Ok(bytes);
        }

        let mut held: Option<String> = None;
        if opts.distributed {
            let owner = Uuid::new_v4().to_string();
            let recheck = match lock::acquire(
                &self.backend,
                key.as_str(),
                &owner,
                opts.dist_lock_ttl,
                opts.dist_lock_timeout,
            ) {
                Ok(true) => {
                    held = Some(owner);
                    true
                }
                Ok(false) => {
                    debug!(%key, "lock wait timed out; computing without distributed dedup");
                    true
                }
                Err(err) => {
                    warn!(%key, ?err, "distributed lock unavailable; computing without it");
                    false
                }
            };
            if recheck {
                if let Some(bytes) = self.read_fresh_blocking(key) {
                    self.release_held_blocking(key, held.take());
                    return Ok(bytes);
                }
            }
        }

        let outcome = match compute().map_err(Error::user) {
            Ok(value) => match codec::encode(&value) {
                Ok(bytes) => {
                    let tags = opts.tags.resolve(args);
                    if let Err(err) = self.backend.set(key, &bytes, opts.ttl, &tags) {
                        warn!(%key, ?err, "backend write failed; returning uncached value");
                    }
                    Ok(bytes)
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        self.release_held_blocking(key, held);
        outcome
    }

    fn read_fresh_blocking(&self, key: &Fingerprint) -> Option<Vec<u8>> {
        match self.backend.get(key) {
            Ok(found) => found,
            Err(err) => {
                warn!(%key, ?err, "backend re-check failed; treating as miss");
                None
            }
        }
    }

    fn release_held_blocking(&self, key: &Fingerprint, owner: Option<String>) {
        let Some(owner) = owner else { return };
        if let Err(err) = AdvisoryLock::release(&self.backend, key.as_str(), &owner) {
            warn!(%key, ?err, "failed to release distributed lock");
        }
    }

    /// Snapshot the backend's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.backend.stats()
    }
}
