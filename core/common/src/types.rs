//! Common types used throughout Inkboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::Record;
use crate::{Error, Result};

/// Kind of a stored record.
///
/// Records form a tree rooted at projects:
/// project → character → section → canvas item / image, and
/// project → edition → page → panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Character,
    Section,
    Image,
    CanvasItem,
    Edition,
    Page,
    Panel,
}

impl EntityKind {
    /// All kinds, parents before children.
    ///
    /// Imports walk this order; cascade deletes walk it in reverse.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Project,
        EntityKind::Character,
        EntityKind::Section,
        EntityKind::Image,
        EntityKind::CanvasItem,
        EntityKind::Edition,
        EntityKind::Page,
        EntityKind::Panel,
    ];

    /// Stable string form used in storage, archives and remote paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Character => "character",
            Self::Section => "section",
            Self::Image => "image",
            Self::CanvasItem => "canvas_item",
            Self::Edition => "edition",
            Self::Page => "page",
            Self::Panel => "panel",
        }
    }

    /// Kind of the owning parent, `None` for roots.
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Project => None,
            Self::Character | Self::Edition => Some(Self::Project),
            Self::Section => Some(Self::Character),
            Self::Image | Self::CanvasItem => Some(Self::Section),
            Self::Page => Some(Self::Edition),
            Self::Panel => Some(Self::Page),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown entity kind: {}", s)))
    }
}

/// A unit of remote synchronization: one record kind, or the binary assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Records(EntityKind),
    Assets,
}

impl Collection {
    /// Every collection, records in dependency order followed by assets.
    pub fn all() -> Vec<Collection> {
        EntityKind::ALL
            .into_iter()
            .map(Collection::Records)
            .chain(std::iter::once(Collection::Assets))
            .collect()
    }

    /// Stable string form used for remote directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Records(kind) => kind.as_str(),
            Self::Assets => "assets",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a manifest: enough to diff two sides without payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Record id, or storage path for assets.
    pub id: String,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// SHA-256 of the content, timestamps excluded.
    pub content_hash: String,
    /// Device that made the last modification, if known.
    #[serde(default)]
    pub device_id: Option<String>,
}

/// A record together with the device that last wrote it.
///
/// This is the payload exchanged with the remote and written to archives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    /// Device that made the last modification.
    #[serde(default)]
    pub device_id: Option<String>,
    /// The record itself.
    pub record: Record,
}

impl RecordEnvelope {
    /// Wrap a record.
    pub fn new(record: Record, device_id: Option<String>) -> Self {
        Self { device_id, record }
    }

    /// Manifest line describing this envelope.
    pub fn manifest_entry(&self) -> Result<ManifestEntry> {
        Ok(ManifestEntry {
            id: self.record.id().to_string(),
            updated_at: self.record.updated_at(),
            content_hash: self.record.content_hash()?,
            device_id: self.device_id.clone(),
        })
    }

    /// Serialize to the wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse the wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Project;

    #[test]
    fn test_entity_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("moodboard".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_parents_precede_children() {
        for (index, kind) in EntityKind::ALL.iter().enumerate() {
            if let Some(parent) = kind.parent_kind() {
                let parent_index = EntityKind::ALL.iter().position(|k| *k == parent).unwrap();
                assert!(parent_index < index, "{} must come after {}", kind, parent);
            }
        }
    }

    #[test]
    fn test_collection_all_ends_with_assets() {
        let all = Collection::all();
        assert_eq!(all.len(), EntityKind::ALL.len() + 1);
        assert_eq!(all.last(), Some(&Collection::Assets));
        assert_eq!(Collection::Records(EntityKind::CanvasItem).as_str(), "canvas_item");
    }

    #[test]
    fn test_envelope_wire_format() {
        let project = Project::new("Noir moodboard");
        let envelope = RecordEnvelope::new(Record::Project(project), Some("device-a".into()));

        let bytes = envelope.to_bytes().unwrap();
        let parsed = RecordEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, envelope);

        let entry = envelope.manifest_entry().unwrap();
        assert_eq!(entry.id, envelope.record.id());
        assert_eq!(entry.device_id.as_deref(), Some("device-a"));
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(matches!(
            RecordEnvelope::from_bytes(b"not json"),
            Err(Error::Serialization(_))
        ));
    }
}
