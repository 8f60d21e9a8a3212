//! Backup archive format.
//!
//! A gzip-compressed tar holding:
//! - `manifest.json` with the format version and per-kind counts
//! - `records/<kind>.jsonl`, one record envelope per line
//! - `assets/<storage path>` for every image asset

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read};
use tar::{Archive, Builder, Header};
use tracing::warn;

use inkboard_common::{EntityKind, Error, RecordEnvelope, Result};
use inkboard_storage::validate_asset_path;

/// The only archive layout this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// Value of the manifest's `app` field.
pub const APP_NAME: &str = "inkboard";

const MANIFEST_PATH: &str = "manifest.json";
const RECORDS_DIR: &str = "records/";
const ASSETS_DIR: &str = "assets/";

/// Archive header describing what the archive holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,
    pub app: String,
    pub exported_at: DateTime<Utc>,
    pub device_id: String,
    /// Record count per kind, keyed by the kind's string form.
    pub counts: BTreeMap<String, usize>,
    pub asset_count: usize,
}

impl ArchiveManifest {
    pub fn new(device_id: impl Into<String>, contents: &ArchiveContents) -> Self {
        let counts = EntityKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), contents.count(*kind)))
            .collect();

        Self {
            format_version: FORMAT_VERSION,
            app: APP_NAME.to_string(),
            exported_at: Utc::now(),
            device_id: device_id.into(),
            counts,
            asset_count: contents.assets.len(),
        }
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.counts.get(kind.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    format_version: u32,
    #[serde(default)]
    app: String,
}

/// Records and assets carried by an archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveContents {
    pub records: BTreeMap<EntityKind, Vec<RecordEnvelope>>,
    pub assets: BTreeMap<String, Vec<u8>>,
}

impl ArchiveContents {
    pub fn count(&self, kind: EntityKind) -> usize {
        self.records.get(&kind).map_or(0, Vec::len)
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.records
            .get(&kind)
            .is_some_and(|envelopes| envelopes.iter().any(|e| e.record.id() == id))
    }
}

fn corrupt(err: io::Error) -> Error {
    Error::InvalidInput(format!("Corrupt archive: {}", err))
}

fn append(builder: &mut Builder<GzEncoder<Vec<u8>>>, path: &str, data: &[u8], mtime: u64) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_cksum();
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Build the gzip tar bytes for an archive.
pub fn encode(manifest: &ArchiveManifest, contents: &ArchiveContents) -> Result<Vec<u8>> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mtime = u64::try_from(manifest.exported_at.timestamp()).unwrap_or(0);

    let header = serde_json::to_vec_pretty(manifest)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    append(&mut builder, MANIFEST_PATH, &header, mtime)?;

    for (kind, envelopes) in &contents.records {
        let mut lines = Vec::new();
        for envelope in envelopes {
            serde_json::to_writer(&mut lines, envelope)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            lines.push(b'\n');
        }
        let path = format!("{}{}.jsonl", RECORDS_DIR, kind.as_str());
        append(&mut builder, &path, &lines, mtime)?;
    }

    for (path, data) in &contents.assets {
        append(&mut builder, &format!("{}{}", ASSETS_DIR, path), data, mtime)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn parse_manifest(data: &[u8]) -> Result<ArchiveManifest> {
    let header: VersionHeader = serde_json::from_slice(data)
        .map_err(|e| Error::UnsupportedFormat(format!("Unreadable archive manifest: {}", e)))?;
    if header.app != APP_NAME {
        return Err(Error::UnsupportedFormat(format!(
            "Not an {} archive (app: {:?})",
            APP_NAME, header.app
        )));
    }
    if header.format_version != FORMAT_VERSION {
        return Err(Error::UnsupportedFormat(format!(
            "Archive format version {} is not supported (expected {})",
            header.format_version, FORMAT_VERSION
        )));
    }

    serde_json::from_slice(data)
        .map_err(|e| Error::InvalidInput(format!("Invalid archive manifest: {}", e)))
}

fn parse_records(kind: EntityKind, data: &[u8]) -> Result<Vec<RecordEnvelope>> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::InvalidInput(format!("records/{}.jsonl is not UTF-8", kind)))?;

    let mut envelopes = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let envelope: RecordEnvelope = serde_json::from_str(line).map_err(|e| {
            Error::InvalidInput(format!("records/{}.jsonl line {}: {}", kind, n + 1, e))
        })?;
        if envelope.record.kind() != kind {
            return Err(Error::InvalidInput(format!(
                "records/{}.jsonl line {} holds a {}",
                kind,
                n + 1,
                envelope.record.kind()
            )));
        }
        envelopes.push(envelope);
    }
    Ok(envelopes)
}

/// Read and fully validate an archive. Nothing is returned unless every
/// part of it parses.
///
/// # Errors
/// - `UnsupportedFormat` for a foreign or newer archive
/// - `InvalidInput` for a damaged archive
pub fn decode(bytes: &[u8]) -> Result<(ArchiveManifest, ArchiveContents)> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut manifest = None;
    let mut record_files = Vec::new();
    let mut contents = ArchiveContents::default();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = String::from_utf8(entry.path_bytes().into_owned())
            .map_err(|_| Error::InvalidInput("Archive entry path is not UTF-8".to_string()))?;
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(corrupt)?;

        if path == MANIFEST_PATH {
            manifest = Some(parse_manifest(&data)?);
        } else if let Some(name) = path.strip_prefix(RECORDS_DIR) {
            let kind = name
                .strip_suffix(".jsonl")
                .ok_or_else(|| Error::InvalidInput(format!("Unexpected record file {}", path)))?
                .parse::<EntityKind>()?;
            record_files.push((kind, data));
        } else if let Some(asset) = path.strip_prefix(ASSETS_DIR) {
            validate_asset_path(asset)?;
            contents.assets.insert(asset.to_string(), data);
        } else {
            warn!("Ignoring unexpected archive entry {}", path);
        }
    }

    let manifest = manifest
        .ok_or_else(|| Error::UnsupportedFormat("Archive has no manifest.json".to_string()))?;

    for (kind, data) in record_files {
        let envelopes = parse_records(kind, &data)?;
        contents.records.entry(kind).or_default().extend(envelopes);
    }

    for kind in EntityKind::ALL {
        if manifest.count(kind) != contents.count(kind) {
            return Err(Error::InvalidInput(format!(
                "Archive lists {} {} records but holds {}",
                manifest.count(kind),
                kind,
                contents.count(kind)
            )));
        }
    }
    if manifest.asset_count != contents.assets.len() {
        return Err(Error::InvalidInput(format!(
            "Archive lists {} assets but holds {}",
            manifest.asset_count,
            contents.assets.len()
        )));
    }

    Ok((manifest, contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_common::{Character, Project, Record};

    fn sample() -> ArchiveContents {
        let project = Project::new("Harbor Lights");
        let character = Character::new(&project.id, "Ines");

        let mut contents = ArchiveContents::default();
        contents.records.insert(
            EntityKind::Project,
            vec![RecordEnvelope::new(Record::Project(project), Some("dev-1".into()))],
        );
        contents.records.insert(
            EntityKind::Character,
            vec![RecordEnvelope::new(Record::Character(character), None)],
        );
        contents
            .assets
            .insert("images/x/abc-original.png".into(), vec![1, 2, 3]);
        contents
    }

    /// Raw archive with arbitrary entries, for damaged-input cases.
    fn raw_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, data) in entries {
            append(&mut builder, path, data, 0).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let contents = sample();
        let manifest = ArchiveManifest::new("dev-1", &contents);
        assert_eq!(manifest.count(EntityKind::Project), 1);
        assert_eq!(manifest.count(EntityKind::Panel), 0);

        let bytes = encode(&manifest, &contents).unwrap();
        let (read_manifest, read_contents) = decode(&bytes).unwrap();

        assert_eq!(read_manifest, manifest);
        assert_eq!(read_contents, contents);
    }

    #[test]
    fn test_newer_version_is_unsupported() {
        let contents = ArchiveContents::default();
        let mut manifest = ArchiveManifest::new("dev-1", &contents);
        manifest.format_version = 2;

        let bytes = encode(&manifest, &contents).unwrap();
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_foreign_archive_is_unsupported() {
        let bytes = raw_archive(&[("manifest.json", br#"{"format_version":1,"app":"other"}"#)]);
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));

        let bytes = raw_archive(&[("readme.txt", b"hello")]);
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_damaged_record_line_is_rejected() {
        let contents = ArchiveContents::default();
        let mut manifest = ArchiveManifest::new("dev-1", &contents);
        manifest.counts.insert("project".into(), 1);
        let header = serde_json::to_vec(&manifest).unwrap();

        let bytes = raw_archive(&[
            ("manifest.json", &header),
            ("records/project.jsonl", b"{not json}\n"),
        ]);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("line 1"), "{}", err);
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let contents = sample();
        let mut manifest = ArchiveManifest::new("dev-1", &contents);
        manifest.counts.insert("character".into(), 4);

        let bytes = encode(&manifest, &contents).unwrap();
        assert!(matches!(decode(&bytes), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_invalid_asset_path_is_rejected() {
        let contents = ArchiveContents::default();
        let header = serde_json::to_vec(&ArchiveManifest::new("dev-1", &contents)).unwrap();

        let bytes = raw_archive(&[
            ("manifest.json", &header),
            ("assets/images\\evil.png", b"data"),
        ]);
        assert!(matches!(decode(&bytes), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_not_gzip() {
        assert!(matches!(
            decode(b"plain bytes"),
            Err(Error::InvalidInput(_))
        ));
    }
}
