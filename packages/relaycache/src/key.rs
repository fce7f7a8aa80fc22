//! Fingerprints and the cache key builder.
//!
//! A [`Fingerprint`] is the final key string stored in a backend. It is
//! assembled from an optional prefix and namespace, the operation identity,
//! and a blake3 digest of the canonicalized arguments, so equal calls always
//! land on the same key across runs and processes.

use std::collections::BTreeMap;

use bon::Builder;
use derive_more::Display;

use crate::error::Result;
use crate::value::{CacheValue, Canonicalize};

/// A deterministic cache key.
///
/// Opaque to callers; safe to embed in any backend's key space. Obtained
/// from [`KeyBuilder::build`] or [`KeyBuilder::user_key`], or adopted from a
/// raw string when talking to a backend directly.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// View the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the underlying key string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Fingerprint {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for Fingerprint {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The positional and named arguments of one cached call.
///
/// Named arguments are kept sorted by name, so the order in which they are
/// added never affects the fingerprint.
#[derive(Clone, Debug, Default)]
pub struct Args {
    positional: Vec<CacheValue>,
    named: BTreeMap<String, CacheValue>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Canonicalize) -> Self {
        self.positional.push(value.canonical());
        self
    }

    /// Add a named argument.
    pub fn named(mut self, name: impl Into<String>, value: impl Canonicalize) -> Self {
        self.named.insert(name.into(), value.canonical());
        self
    }

    pub fn positional(&self) -> &[CacheValue] {
        &self.positional
    }

    pub fn named_args(&self) -> &BTreeMap<String, CacheValue> {
        &self.named
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// Builds stable fingerprints from an operation identity and its arguments.
///
/// `prefix` and `namespace` isolate tenants sharing one backend; both are
/// optional and omitted from the key when empty.
#[derive(Clone, Debug, Builder)]
pub struct KeyBuilder {
    #[builder(into, default)]
    prefix: String,
    #[builder(into, default)]
    namespace: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl KeyBuilder {
    /// Build the fingerprint for `identity` applied to `args`.
    ///
    /// The digest covers only the canonicalized arguments; identity, prefix,
    /// and namespaces are concatenated around it so related keys stay
    /// greppable in a backend.
    pub fn build(
        &self,
        identity: &str,
        args: &Args,
        extra_namespace: Option<&str>,
    ) -> Result<Fingerprint> {
        let mut buf = Vec::new();
        CacheValue::Seq(args.positional.clone()).canonical_bytes(&mut buf)?;
        CacheValue::Map(
            args.named
                .iter()
                .map(|(name, value)| (CacheValue::Str(name.clone()), value.clone()))
                .collect(),
        )
        .canonical_bytes(&mut buf)?;

        let digest = blake3::hash(&buf);
        let digest = hex::encode(digest.as_bytes());
        Ok(self.assemble(extra_namespace, identity, &digest))
    }

    /// Adopt a caller-supplied key, bypassing canonicalization.
    ///
    /// The prefix and namespace still apply, so user keys stay inside the
    /// builder's slice of the backend key space.
    pub fn user_key(&self, explicit: &str) -> Fingerprint {
        let parts = [self.prefix.as_str(), self.namespace.as_str(), explicit];
        Fingerprint(join_non_empty(&parts))
    }

    fn assemble(&self, extra_namespace: Option<&str>, identity: &str, digest: &str) -> Fingerprint {
        let parts = [
            self.prefix.as_str(),
            self.namespace.as_str(),
            extra_namespace.unwrap_or(""),
            identity,
            digest,
        ];
        Fingerprint(join_non_empty(&parts))
    }
}

fn join_non_empty(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|part| !part.is_empty()) {
        if !out.is_empty() {
            out.push(':');
        }
        out.push_str(part);
    }
    out
}
