//! Common utilities and types shared across Inkboard modules.
//!
//! This module provides the error taxonomy, the entity model and the
//! manifest types that the storage, sync and backup crates agree on.

pub mod error;
pub mod hash;
pub mod model;
pub mod types;

pub use error::{Error, ErrorCode, Result};
pub use hash::{bytes_hash, content_hash, record_hash};
pub use model::{CanvasItem, Character, Edition, Image, Page, Panel, Project, Record, Section};
pub use types::{Collection, EntityKind, ManifestEntry, RecordEnvelope};
