//! SQLite-backed local entity store.
//!
//! Every record lives in one `records` table as a JSON document. The
//! parent link is a self-referencing foreign key with `ON DELETE CASCADE`,
//! so deleting any record removes its whole subtree in one statement.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::ChangeNotifier;
use crate::files::FileStorage;
use crate::repository::{KeyValueStore, LocalRepository};
use inkboard_common::{
    bytes_hash, EntityKind, Error, Image, ManifestEntry, Record, RecordEnvelope, Result,
};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    parent_id TEXT REFERENCES records(id) ON DELETE CASCADE,
    updated_at TEXT NOT NULL,
    device_id TEXT,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
CREATE INDEX IF NOT EXISTS idx_records_parent ON records(parent_id);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const SUBTREE_IMAGES: &str = r#"
WITH RECURSIVE subtree(id) AS (
    SELECT id FROM records WHERE id = ?1
    UNION ALL
    SELECT r.id FROM records r JOIN subtree s ON r.parent_id = s.id
)
SELECT r.body, r.device_id FROM records r JOIN subtree s ON r.id = s.id
WHERE r.kind = 'image'
"#;

const ITEMS_SHOWING_IMAGE: &str = r#"
SELECT body, device_id FROM records
WHERE kind = 'canvas_item' AND json_extract(body, '$.image_id') = ?1
"#;

const DEVICE_ID_KEY: &str = "device_id";

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn encode_body(record: &Record) -> Result<String> {
    serde_json::to_string(record).map_err(|e| Error::Serialization(e.to_string()))
}

fn decode_row(body: &str, device_id: Option<String>) -> Result<RecordEnvelope> {
    let record: Record =
        serde_json::from_str(body).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(RecordEnvelope::new(record, device_id))
}

fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(db_err)
}

fn meta_put(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Fetch a stored record by id regardless of kind.
fn fetch(conn: &Connection, id: &str) -> Result<Option<RecordEnvelope>> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT body, device_id FROM records WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;

    row.map(|(body, device_id)| decode_row(&body, device_id))
        .transpose()
}

/// Ensure the record's parent exists and has the right kind.
fn check_parent(conn: &Connection, record: &Record) -> Result<()> {
    let (Some(parent_kind), Some(parent_id)) = (record.kind().parent_kind(), record.parent_id())
    else {
        return Ok(());
    };

    let kind: Option<String> = conn
        .query_row("SELECT kind FROM records WHERE id = ?1", [parent_id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_err)?;

    match kind {
        Some(kind) if kind == parent_kind.as_str() => Ok(()),
        Some(kind) => Err(Error::InvalidInput(format!(
            "{} {} cannot belong to {} {}",
            record.kind(),
            record.id(),
            kind,
            parent_id
        ))),
        None => Err(Error::NotFound(format!(
            "Parent {} {} of {} {}",
            parent_kind,
            parent_id,
            record.kind(),
            record.id()
        ))),
    }
}

/// Insert or update a row. Never deletes, so children survive updates.
fn write_row(conn: &Connection, envelope: &RecordEnvelope) -> Result<()> {
    let record = &envelope.record;
    conn.execute(
        "INSERT INTO records (id, kind, parent_id, updated_at, device_id, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             parent_id = excluded.parent_id,
             updated_at = excluded.updated_at,
             device_id = excluded.device_id,
             body = excluded.body",
        params![
            record.id(),
            record.kind().as_str(),
            record.parent_id(),
            record
                .updated_at()
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            envelope.device_id,
            encode_body(record)?,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Asset paths the old version of an image referenced but the new one no longer does.
fn replaced_assets(old: &RecordEnvelope, new: &Record) -> Vec<String> {
    let Some(old_image) = old.record.as_image() else {
        return Vec::new();
    };
    let kept = new.as_image().map(Image::asset_paths).unwrap_or_default();
    old_image
        .asset_paths()
        .into_iter()
        .filter(|path| !kept.contains(path))
        .map(str::to_string)
        .collect()
}

/// Canvas items whose `image_id` points at `image_id`.
fn items_showing(conn: &Connection, image_id: &str) -> Result<Vec<RecordEnvelope>> {
    let mut stmt = conn.prepare(ITEMS_SHOWING_IMAGE).map_err(db_err)?;
    let rows = stmt
        .query_map([image_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(db_err)?;

    let mut items = Vec::new();
    for row in rows {
        let (body, device_id) = row.map_err(db_err)?;
        items.push(decode_row(&body, device_id)?);
    }
    Ok(items)
}

/// What a subtree delete left behind for the caller to clean up.
struct Removed {
    assets: Vec<String>,
    detached: Vec<String>,
}

/// Local entity store using SQLite.
pub struct LocalStore {
    conn: Mutex<Connection>,
    files: Arc<dyn FileStorage>,
    device_id: String,
    changes: ChangeNotifier,
}

impl LocalStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>, files: Arc<dyn FileStorage>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        Self::init(conn, files)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(files: Arc<dyn FileStorage>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, files)
    }

    fn init(conn: Connection, files: Arc<dyn FileStorage>) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        let device_id = match meta_get(&conn, DEVICE_ID_KEY)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                meta_put(&conn, DEVICE_ID_KEY, &id)?;
                id
            }
        };

        info!("Local store opened (device {})", device_id);
        Ok(Self {
            conn: Mutex::new(conn),
            files,
            device_id,
            changes: ChangeNotifier::new(),
        })
    }

    /// Publisher of local change events.
    pub fn changes(&self) -> &ChangeNotifier {
        &self.changes
    }

    /// The asset storage records point into.
    pub fn files(&self) -> Arc<dyn FileStorage> {
        self.files.clone()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self, mut record: Record) -> RecordEnvelope {
        record.set_updated_at(Utc::now());
        RecordEnvelope::new(record, Some(self.device_id.clone()))
    }

    /// Write assets, returning the paths that did not exist before.
    ///
    /// On failure, assets written so far are removed again.
    async fn write_assets(&self, assets: Vec<(String, Vec<u8>)>) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for (path, data) in assets {
            let existed = match self.files.exists(&path).await {
                Ok(existed) => existed,
                Err(e) => {
                    self.remove_assets(&created).await;
                    return Err(e);
                }
            };
            if let Err(e) = self.files.save(&path, data).await {
                self.remove_assets(&created).await;
                return Err(e);
            }
            if !existed {
                created.push(path);
            }
        }
        Ok(created)
    }

    async fn remove_assets(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.files.delete(path).await {
                warn!("Failed to delete asset {}: {}", path, e);
            }
        }
    }

    fn insert_new(&self, envelope: &RecordEnvelope) -> Result<()> {
        let conn = self.conn();
        if fetch(&conn, envelope.record.id())?.is_some() {
            return Err(Error::AlreadyExists(format!(
                "{} {}",
                envelope.record.kind(),
                envelope.record.id()
            )));
        }
        check_parent(&conn, &envelope.record)?;
        write_row(&conn, envelope)
    }

    /// Upsert a record, returning assets the previous version no longer needs.
    fn upsert(&self, envelope: &RecordEnvelope, must_exist: bool) -> Result<Vec<String>> {
        let record = &envelope.record;
        let conn = self.conn();

        let old = fetch(&conn, record.id())?;
        match &old {
            Some(old) if old.record.kind() != record.kind() => {
                return Err(Error::InvalidInput(format!(
                    "Id {} already belongs to a {}",
                    record.id(),
                    old.record.kind()
                )));
            }
            None if must_exist => {
                return Err(Error::NotFound(format!("{} {}", record.kind(), record.id())));
            }
            _ => {}
        }

        check_parent(&conn, record)?;
        write_row(&conn, envelope)?;

        Ok(old
            .map(|old| replaced_assets(&old, record))
            .unwrap_or_default())
    }

    /// Delete a record and its subtree in one transaction.
    ///
    /// Canvas items outside the subtree that showed a deleted image lose
    /// their `image_id` in the same transaction.
    fn delete_subtree(&self, kind: EntityKind, id: &str) -> Result<Removed> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(db_err)?;

        let removed = self
            .remove_subtree(&tx, kind, id, true)?
            .ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))?;
        tx.commit().map_err(db_err)?;
        Ok(removed)
    }

    /// Replace whatever has the envelope's id, subtree included, with the
    /// envelope in one transaction. Returns `None` when nothing was replaced.
    fn swap_subtree(&self, envelope: &RecordEnvelope) -> Result<Option<Removed>> {
        let record = &envelope.record;
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(db_err)?;

        if let Some(old) = fetch(&tx, record.id())? {
            if old.record.kind() != record.kind() {
                return Err(Error::InvalidInput(format!(
                    "Id {} already belongs to a {}",
                    record.id(),
                    old.record.kind()
                )));
            }
        }
        // Images come back under the same ids, so references to them stay.
        let removed = self.remove_subtree(&tx, record.kind(), record.id(), false)?;
        check_parent(&tx, record)?;
        write_row(&tx, envelope)?;
        tx.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn remove_subtree(
        &self,
        conn: &Connection,
        kind: EntityKind,
        id: &str,
        detach_items: bool,
    ) -> Result<Option<Removed>> {
        let images = {
            let mut stmt = conn.prepare(SUBTREE_IMAGES).map_err(db_err)?;
            let rows = stmt
                .query_map([id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })
                .map_err(db_err)?;
            let mut images = Vec::new();
            for row in rows {
                let (body, device_id) = row.map_err(db_err)?;
                images.push(decode_row(&body, device_id)?);
            }
            images
        };

        let removed = conn
            .execute(
                "DELETE FROM records WHERE id = ?1 AND kind = ?2",
                params![id, kind.as_str()],
            )
            .map_err(db_err)?;
        if removed == 0 {
            return Ok(None);
        }

        let mut detached = Vec::new();
        if detach_items {
            for envelope in &images {
                for mut item in items_showing(conn, envelope.record.id())? {
                    if let Record::CanvasItem(canvas_item) = &mut item.record {
                        canvas_item.image_id = None;
                    }
                    let item = self.stamp(item.record);
                    write_row(conn, &item)?;
                    detached.push(item.record.id().to_string());
                }
            }
        }

        Ok(Some(Removed {
            assets: images
                .iter()
                .filter_map(|envelope| envelope.record.as_image())
                .flat_map(|image| image.asset_paths())
                .map(str::to_string)
                .collect(),
            detached,
        }))
    }
}

#[async_trait]
impl LocalRepository for LocalStore {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<RecordEnvelope>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT body, device_id FROM records WHERE kind = ?1 ORDER BY updated_at, id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([kind.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(db_err)?;

        let mut result = Vec::new();
        for row in rows {
            let (body, device_id) = row.map_err(db_err)?;
            result.push(decode_row(&body, device_id)?);
        }
        Ok(result)
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<RecordEnvelope>> {
        let conn = self.conn();
        Ok(fetch(&conn, id)?.filter(|envelope| envelope.record.kind() == kind))
    }

    async fn create(&self, record: Record) -> Result<Record> {
        let envelope = self.stamp(record);
        self.insert_new(&envelope)?;

        debug!("Created {} {}", envelope.record.kind(), envelope.record.id());
        self.changes
            .notify(envelope.record.kind(), envelope.record.id());
        Ok(envelope.record)
    }

    async fn update(&self, record: Record) -> Result<Record> {
        let envelope = self.stamp(record);
        let stale = self.upsert(&envelope, true)?;
        self.remove_assets(&stale).await;

        debug!("Updated {} {}", envelope.record.kind(), envelope.record.id());
        self.changes
            .notify(envelope.record.kind(), envelope.record.id());
        Ok(envelope.record)
    }

    async fn import(&self, envelope: RecordEnvelope) -> Result<()> {
        let stale = self.upsert(&envelope, false)?;
        self.remove_assets(&stale).await;
        debug!("Imported {} {}", envelope.record.kind(), envelope.record.id());
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let removed = self.delete_subtree(kind, id)?;
        self.remove_assets(&removed.assets).await;

        info!(
            "Deleted {} {} ({} assets released)",
            kind,
            id,
            removed.assets.len()
        );
        self.changes.notify(kind, id);
        for item in &removed.detached {
            debug!("Canvas item {} no longer shows an image", item);
            self.changes.notify(EntityKind::CanvasItem, item);
        }
        Ok(())
    }

    async fn restore_record(
        &self,
        envelope: RecordEnvelope,
        assets: Vec<(String, Vec<u8>)>,
    ) -> Result<bool> {
        let incoming: Vec<String> = assets.iter().map(|(path, _)| path.clone()).collect();
        let created = self.write_assets(assets).await?;

        let removed = match self.swap_subtree(&envelope) {
            Ok(removed) => removed,
            Err(e) => {
                self.remove_assets(&created).await;
                return Err(e);
            }
        };

        let replaced = removed.is_some();
        if let Some(removed) = removed {
            let released: Vec<String> = removed
                .assets
                .into_iter()
                .filter(|path| !incoming.contains(path))
                .collect();
            self.remove_assets(&released).await;
        }

        debug!(
            "Restored {} {}{}",
            envelope.record.kind(),
            envelope.record.id(),
            if replaced { " over the local copy" } else { "" }
        );
        self.changes
            .notify(envelope.record.kind(), envelope.record.id());
        Ok(replaced)
    }

    async fn manifest(&self, kind: EntityKind) -> Result<Vec<ManifestEntry>> {
        self.list(kind)
            .await?
            .iter()
            .map(RecordEnvelope::manifest_entry)
            .collect()
    }

    async fn create_image(
        &self,
        mut image: Image,
        original: Vec<u8>,
        thumbnail: Vec<u8>,
    ) -> Result<Image> {
        let extension = image.extension();
        image.original_path = format!(
            "images/{}/{}-original.{}",
            image.id,
            &bytes_hash(&original)[..16],
            extension
        );
        image.thumbnail_path = format!(
            "images/{}/{}-thumb.{}",
            image.id,
            &bytes_hash(&thumbnail)[..16],
            extension
        );

        let created = self
            .write_assets(vec![
                (image.original_path.clone(), original),
                (image.thumbnail_path.clone(), thumbnail),
            ])
            .await?;

        let envelope = self.stamp(Record::Image(image));
        if let Err(e) = self.insert_new(&envelope) {
            warn!(
                "Image {} record write failed, rolling back assets: {}",
                envelope.record.id(),
                e
            );
            self.remove_assets(&created).await;
            return Err(e);
        }

        self.changes
            .notify(EntityKind::Image, envelope.record.id());
        envelope
            .record
            .as_image()
            .cloned()
            .ok_or_else(|| Error::Storage("Stored record is not an image".to_string()))
    }

    async fn count(&self, kind: EntityKind) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE kind = ?1",
                [kind.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        meta_get(&self.conn(), key)
    }

    async fn put_value(&self, key: &str, value: &str) -> Result<()> {
        meta_put(&self.conn(), key, value)
    }
}
