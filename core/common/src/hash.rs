//! Content hashing for change detection.
//!
//! Records are hashed over their serialized JSON so two sides can be
//! compared through manifests without transferring payloads.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::Record;
use crate::{Error, Result};

/// SHA-256 of raw bytes, lowercase hex.
pub fn bytes_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of the JSON serialization of a value.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(bytes_hash(&json))
}

/// Hash of a record with `updated_at` removed.
///
/// Two copies edited to the same content at different times hash equal.
pub fn record_hash(record: &Record) -> Result<String> {
    let mut value =
        serde_json::to_value(record).map_err(|e| Error::Serialization(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("updated_at");
    }
    content_hash(&value)
}
