//! Value codec: serialization of computed results for storage.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Encode a computed value for storage.
///
/// Failure here means the value's `Serialize` implementation rejected it,
/// which is the caller's value misbehaving, so it maps to [`Error::User`].
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::user(Box::new(e)))
}

/// Decode a stored entry.
///
/// Failure maps to [`Error::Corrupt`] so callers can treat the entry as a
/// miss and delete it best-effort.
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Corrupt {
        key: key.to_string(),
        source: std::sync::Arc::new(e),
    })
}
