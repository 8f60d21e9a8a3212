//! Backup and restore of the whole local dataset.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use inkboard_common::{EntityKind, Error, RecordEnvelope, Result};
use inkboard_storage::{FileStorage, LocalRepository};

use crate::archive::{self, ArchiveContents, ArchiveManifest};
use crate::progress::{BackupProgress, BackupStage, ExportGroup, RestoreProgress, RestoreStage};

/// Summary of a written backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub path: PathBuf,
    pub counts: BTreeMap<EntityKind, usize>,
    pub asset_count: usize,
    pub size: u64,
}

impl BackupReport {
    pub fn record_count(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Summary of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub exported_at: DateTime<Utc>,
    pub imported: BTreeMap<EntityKind, usize>,
    /// Existing records that were replaced, together with their subtrees.
    pub replaced: usize,
    pub assets: usize,
}

impl RestoreReport {
    pub fn record_count(&self) -> usize {
        self.imported.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Backup,
    Restore,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
        })
    }
}

struct OperationGuard<'a> {
    active: &'a Mutex<Option<Operation>>,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        *lock(self.active) = None;
    }
}

fn lock(active: &Mutex<Option<Operation>>) -> MutexGuard<'_, Option<Operation>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `<dest>.partial`, next to the destination.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::Storage(format!("Archive task failed: {}", err))
}

const STAGE_EVENT_CAPACITY: usize = 32;

/// Writes and reads backup archives. One operation runs at a time.
pub struct Packager {
    local: Arc<dyn LocalRepository>,
    files: Arc<dyn FileStorage>,
    active: Mutex<Option<Operation>>,
    backup_progress: watch::Sender<BackupProgress>,
    restore_progress: watch::Sender<RestoreProgress>,
    backup_events: broadcast::Sender<BackupStage>,
    restore_events: broadcast::Sender<RestoreStage>,
}

impl Packager {
    pub fn new(local: Arc<dyn LocalRepository>, files: Arc<dyn FileStorage>) -> Self {
        let (backup_progress, _) = watch::channel(BackupProgress::default());
        let (restore_progress, _) = watch::channel(RestoreProgress::default());
        let (backup_events, _) = broadcast::channel(STAGE_EVENT_CAPACITY);
        let (restore_events, _) = broadcast::channel(STAGE_EVENT_CAPACITY);
        Self {
            local,
            files,
            active: Mutex::new(None),
            backup_progress,
            restore_progress,
            backup_events,
            restore_events,
        }
    }

    pub fn is_backing_up(&self) -> bool {
        *lock(&self.active) == Some(Operation::Backup)
    }

    pub fn is_restoring(&self) -> bool {
        *lock(&self.active) == Some(Operation::Restore)
    }

    pub fn subscribe_backup(&self) -> watch::Receiver<BackupProgress> {
        self.backup_progress.subscribe()
    }

    pub fn subscribe_restore(&self) -> watch::Receiver<RestoreProgress> {
        self.restore_progress.subscribe()
    }

    /// Every backup stage change, in order.
    pub fn backup_stages(&self) -> broadcast::Receiver<BackupStage> {
        self.backup_events.subscribe()
    }

    /// Every restore stage change, in order.
    pub fn restore_stages(&self) -> broadcast::Receiver<RestoreStage> {
        self.restore_events.subscribe()
    }

    fn begin(&self, operation: Operation) -> Result<OperationGuard<'_>> {
        let mut active = lock(&self.active);
        if let Some(current) = *active {
            return Err(Error::Busy(format!("A {} is already running", current)));
        }
        *active = Some(operation);
        Ok(OperationGuard {
            active: &self.active,
        })
    }

    fn backup_stage(&self, stage: BackupStage, message: impl Into<String>) {
        let message = message.into();
        debug!("Backup stage: {} ({})", stage, message);
        self.backup_progress.send_modify(|p| {
            p.stage = stage;
            p.message = message;
        });
        // Nobody listening is fine.
        self.backup_events.send(stage).ok();
    }

    fn restore_stage(&self, stage: RestoreStage, message: impl Into<String>) {
        let message = message.into();
        debug!("Restore stage: {} ({})", stage, message);
        self.restore_progress.send_modify(|p| {
            p.stage = stage;
            p.message = message;
        });
        self.restore_events.send(stage).ok();
    }

    /// Write every record and asset to a gzip tar archive at `dest`.
    ///
    /// The archive is written to `<dest>.partial` and renamed into place, so
    /// `dest` never holds a half-written archive.
    ///
    /// # Errors
    /// - `Busy` if a backup or restore is running
    pub async fn backup(&self, dest: impl AsRef<Path>) -> Result<BackupReport> {
        let _guard = self.begin(Operation::Backup)?;
        let dest = dest.as_ref();

        self.backup_progress.send_replace(BackupProgress::default());
        self.backup_stage(BackupStage::Preparing, "Preparing backup");
        info!("Backing up to {}", dest.display());

        match self.write_backup(dest).await {
            Ok(report) => {
                self.backup_stage(
                    BackupStage::Complete,
                    format!("Backup written to {}", report.path.display()),
                );
                info!(
                    "Backup complete: {} records, {} assets, {} bytes",
                    report.record_count(),
                    report.asset_count,
                    report.size
                );
                Ok(report)
            }
            Err(e) => {
                self.backup_stage(BackupStage::Failed, format!("Backup failed: {}", e));
                error!("Backup failed: {}", e);
                Err(e)
            }
        }
    }

    async fn write_backup(&self, dest: &Path) -> Result<BackupReport> {
        let mut listed = BTreeMap::new();
        for kind in EntityKind::ALL {
            listed.insert(kind, self.local.list(kind).await?);
        }
        let total = listed.values().map(Vec::len).sum();
        self.backup_progress.send_modify(|p| p.total = total);

        let mut contents = ArchiveContents::default();
        for group in ExportGroup::ALL {
            let kinds = group.kinds();
            let count: usize = kinds
                .iter()
                .map(|kind| listed.get(kind).map_or(0, Vec::len))
                .sum();
            self.backup_stage(
                BackupStage::Exporting(group),
                format!("Exporting {} {}", count, group),
            );

            for kind in kinds {
                let Some(envelopes) = listed.remove(&kind) else {
                    continue;
                };
                self.export_records(kind, envelopes, &mut contents).await?;
            }
        }

        self.backup_stage(BackupStage::Packaging, "Packaging archive");
        let manifest = ArchiveManifest::new(self.local.device_id(), &contents);
        let counts = EntityKind::ALL
            .iter()
            .map(|kind| (*kind, contents.count(*kind)))
            .collect();
        let asset_count = contents.assets.len();
        let bytes = tokio::task::spawn_blocking(move || archive::encode(&manifest, &contents))
            .await
            .map_err(join_error)??;

        let partial = partial_path(dest);
        if let Err(e) = write_and_rename(&partial, dest, &bytes).await {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!("No partial file to remove at {}: {}", partial.display(), cleanup);
            }
            return Err(e);
        }

        Ok(BackupReport {
            path: dest.to_path_buf(),
            counts,
            asset_count,
            size: bytes.len() as u64,
        })
    }

    async fn export_records(
        &self,
        kind: EntityKind,
        envelopes: Vec<RecordEnvelope>,
        contents: &mut ArchiveContents,
    ) -> Result<()> {
        for envelope in envelopes {
            if let Some(image) = envelope.record.as_image() {
                for path in image.asset_paths() {
                    match self.files.load(path).await {
                        Ok(data) => {
                            contents.assets.insert(path.to_string(), data);
                        }
                        Err(Error::NotFound(_)) => {
                            warn!("Image {} is missing asset {}", image.id, path);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            contents.records.entry(kind).or_default().push(envelope);
            self.backup_progress.send_modify(|p| p.processed += 1);
        }
        Ok(())
    }

    /// Restore an archive into the local store.
    ///
    /// The whole archive is validated before anything is written. Records
    /// are then imported parents first. A record whose id already exists
    /// replaces the local one, whose descendants and their assets go with
    /// it. Each replacement is a single store transaction, so a failing
    /// record leaves its local copy intact. Local records absent from the
    /// archive are kept.
    ///
    /// # Errors
    /// - `Busy` if a backup or restore is running
    /// - `UnsupportedFormat` if the archive is foreign or too new
    /// - `InvalidInput` if the archive is damaged or a record's parent is
    ///   in neither the archive nor the local store
    pub async fn restore(&self, src: impl AsRef<Path>) -> Result<RestoreReport> {
        let _guard = self.begin(Operation::Restore)?;
        let src = src.as_ref();

        self.restore_progress.send_replace(RestoreProgress::default());
        self.restore_stage(
            RestoreStage::Reading,
            format!("Reading {}", src.display()),
        );
        info!("Restoring from {}", src.display());

        match self.read_and_import(src).await {
            Ok(report) => {
                self.restore_stage(
                    RestoreStage::Complete,
                    format!("Restored {} records", report.record_count()),
                );
                info!(
                    "Restore complete: {} records ({} replaced), {} assets",
                    report.record_count(),
                    report.replaced,
                    report.assets
                );
                Ok(report)
            }
            Err(e) => {
                self.restore_stage(RestoreStage::Failed, format!("Restore failed: {}", e));
                error!("Restore failed: {}", e);
                Err(e)
            }
        }
    }

    async fn read_and_import(&self, src: &Path) -> Result<RestoreReport> {
        let bytes = fs::read(src).await?;

        self.restore_stage(RestoreStage::Validating, "Validating archive");
        let (manifest, contents) = tokio::task::spawn_blocking(move || archive::decode(&bytes))
            .await
            .map_err(join_error)??;
        debug!(
            "Archive from device {} exported at {}",
            manifest.device_id, manifest.exported_at
        );
        self.check_parents(&contents).await?;

        let total = contents.record_count();
        self.restore_progress.send_modify(|p| p.total = total);

        let mut report = RestoreReport {
            exported_at: manifest.exported_at,
            imported: BTreeMap::new(),
            replaced: 0,
            assets: 0,
        };
        let ArchiveContents {
            mut records,
            mut assets,
        } = contents;
        let mut replaced_ids = Vec::new();

        for kind in EntityKind::ALL {
            let Some(envelopes) = records.remove(&kind) else {
                continue;
            };
            self.restore_stage(
                RestoreStage::Importing(kind),
                format!("Importing {} {} records", envelopes.len(), kind),
            );

            for envelope in envelopes {
                let id = envelope.record.id().to_string();
                let files = envelope
                    .record
                    .as_image()
                    .map(|image| {
                        image
                            .asset_paths()
                            .into_iter()
                            .filter_map(|path| {
                                assets.remove(path).map(|data| (path.to_string(), data))
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let file_count = files.len();

                match self.local.restore_record(envelope, files).await {
                    Ok(replaced) => {
                        if replaced {
                            debug!("Replaced local {} {}", kind, id);
                            report.replaced += 1;
                            replaced_ids.push(format!("{} {}", kind, id));
                        }
                    }
                    Err(e) => {
                        if !replaced_ids.is_empty() {
                            warn!(
                                "Restore stopped at {} {}; already replaced: {}",
                                kind,
                                id,
                                replaced_ids.join(", ")
                            );
                        }
                        return Err(e);
                    }
                }

                report.assets += file_count;
                *report.imported.entry(kind).or_default() += 1;
                self.restore_progress.send_modify(|p| p.processed += 1);
            }
        }

        if !assets.is_empty() {
            warn!("{} archived assets belong to no restored image", assets.len());
        }
        Ok(report)
    }

    /// Every record's parent must be restored too or already exist.
    async fn check_parents(&self, contents: &ArchiveContents) -> Result<()> {
        for (kind, envelopes) in &contents.records {
            let Some(parent_kind) = kind.parent_kind() else {
                continue;
            };
            for envelope in envelopes {
                let Some(parent_id) = envelope.record.parent_id() else {
                    continue;
                };
                if contents.contains(parent_kind, parent_id)
                    || self.local.get(parent_kind, parent_id).await?.is_some()
                {
                    continue;
                }
                return Err(Error::InvalidInput(format!(
                    "{} {} belongs to {} {}, which is neither in the archive nor on this device",
                    kind,
                    envelope.record.id(),
                    parent_kind,
                    parent_id
                )));
            }
        }
        Ok(())
    }
}

async fn write_and_rename(partial: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(partial, bytes).await?;
    fs::rename(partial, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_common::{
        CanvasItem, Character, Edition, Image, Page, Panel, Project, Record, Section,
    };
    use inkboard_storage::{LocalStore, MemoryFileStorage};
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<LocalStore>,
        files: Arc<MemoryFileStorage>,
        packager: Packager,
    }

    fn fixture() -> Fixture {
        let files = Arc::new(MemoryFileStorage::new());
        let store = Arc::new(LocalStore::in_memory(files.clone()).unwrap());
        let packager = Packager::new(store.clone(), files.clone());
        Fixture {
            store,
            files,
            packager,
        }
    }

    /// One record of every kind, eight in all, with two image assets.
    async fn seed(store: &LocalStore) -> (Project, Character) {
        let project = Project::new("Tide Tables");
        store.create(Record::Project(project.clone())).await.unwrap();
        let character = Character::new(&project.id, "Oskar");
        store.create(Record::Character(character.clone())).await.unwrap();
        let section = Section::new(&character.id, "Poses", 0);
        store.create(Record::Section(section.clone())).await.unwrap();
        let image = store
            .create_image(
                Image::new(&section.id, "pose.jpg", "image/jpeg", 800, 600),
                b"jpeg-bytes".to_vec(),
                b"jpeg-thumb".to_vec(),
            )
            .await
            .unwrap();
        let mut item = CanvasItem::new(&section.id, 40.0, 40.0, 320.0, 240.0);
        item.image_id = Some(image.id.clone());
        store.create(Record::CanvasItem(item)).await.unwrap();
        let edition = Edition::new(&project.id, "Issue 1");
        store.create(Record::Edition(edition.clone())).await.unwrap();
        let page = Page::new(&edition.id, 1);
        store.create(Record::Page(page.clone())).await.unwrap();
        store
            .create(Record::Panel(Panel::new(&page.id, 1, "Low tide at dawn")))
            .await
            .unwrap();
        (project, character)
    }

    #[tokio::test]
    async fn test_backup_then_restore_elsewhere() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("inkboard.tar.gz");
        let source = fixture();
        seed(&source.store).await;

        let report = source.packager.backup(&dest).await.unwrap();
        assert_eq!(report.record_count(), EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            assert_eq!(report.counts[&kind], 1, "{} count", kind);
        }
        assert_eq!(report.asset_count, 2);
        assert!(dest.exists());
        assert!(!partial_path(&dest).exists());
        assert_eq!(source.packager.subscribe_backup().borrow().percent(), 100);

        let target = fixture();
        let restored = target.packager.restore(&dest).await.unwrap();
        assert_eq!(restored.record_count(), EntityKind::ALL.len());
        assert_eq!(restored.replaced, 0);
        assert_eq!(restored.assets, 2);

        for kind in EntityKind::ALL {
            assert_eq!(restored.imported[&kind], 1, "{} imported", kind);
            assert_eq!(
                source.store.list(kind).await.unwrap(),
                target.store.list(kind).await.unwrap()
            );
        }
        let paths = source.files.list().await.unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(target.files.list().await.unwrap().len(), 2);
        for path in paths {
            assert_eq!(
                source.files.load(&path).await.unwrap(),
                target.files.load(&path).await.unwrap()
            );
        }
        let progress = target.packager.subscribe_restore().borrow().clone();
        assert_eq!(progress.stage, RestoreStage::Complete);
        assert_eq!(progress.processed, EntityKind::ALL.len());
        assert_eq!(progress.message, "Restored 8 records");
    }

    #[tokio::test]
    async fn test_stages_follow_export_and_import_order() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("stages.tar.gz");
        let source = fixture();
        seed(&source.store).await;

        let mut stages = source.packager.backup_stages();
        source.packager.backup(&dest).await.unwrap();
        let mut seen = Vec::new();
        while let Ok(stage) = stages.try_recv() {
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                BackupStage::Preparing,
                BackupStage::Exporting(ExportGroup::Projects),
                BackupStage::Exporting(ExportGroup::Characters),
                BackupStage::Exporting(ExportGroup::Images),
                BackupStage::Packaging,
                BackupStage::Complete,
            ]
        );
        let progress = source.packager.subscribe_backup().borrow().clone();
        assert!(progress.message.starts_with("Backup written to"));

        let target = fixture();
        let mut stages = target.packager.restore_stages();
        target.packager.restore(&dest).await.unwrap();
        let mut seen = Vec::new();
        while let Ok(stage) = stages.try_recv() {
            seen.push(stage);
        }
        let mut expected = vec![RestoreStage::Reading, RestoreStage::Validating];
        expected.extend(EntityKind::ALL.into_iter().map(RestoreStage::Importing));
        expected.push(RestoreStage::Complete);
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_restore_publishes_local_changes() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("changes.tar.gz");
        let source = fixture();
        let (project, _) = seed(&source.store).await;
        source.packager.backup(&dest).await.unwrap();

        let target = fixture();
        let mut changes = target.store.changes().subscribe();
        target.packager.restore(&dest).await.unwrap();

        let first = changes.try_recv().unwrap();
        assert_eq!(first.kind, EntityKind::Project);
        assert_eq!(first.id, project.id);
        let mut count = 1;
        while changes.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, EntityKind::ALL.len());
    }

    #[tokio::test]
    async fn test_restore_overwrites_by_id() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("inkboard.tar.gz");
        let f = fixture();
        let (project, _) = seed(&f.store).await;
        f.packager.backup(&dest).await.unwrap();

        let mut renamed = project.clone();
        renamed.name = "Changed after backup".into();
        f.store.update(Record::Project(renamed)).await.unwrap();
        f.store
            .create(Record::Character(Character::new(&project.id, "Added later")))
            .await
            .unwrap();
        let other = Project::new("Not in the archive");
        f.store.create(Record::Project(other.clone())).await.unwrap();

        let report = f.packager.restore(&dest).await.unwrap();
        assert_eq!(report.replaced, 1);

        let restored = f.store.get(EntityKind::Project, &project.id).await.unwrap().unwrap();
        let Record::Project(restored) = restored.record else {
            panic!("not a project");
        };
        assert_eq!(restored.name, "Tide Tables");
        assert_eq!(f.store.count(EntityKind::Character).await.unwrap(), 1);
        assert!(f.store.get(EntityKind::Project, &other.id).await.unwrap().is_some());
        assert_eq!(f.files.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_rejects_newer_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.tar.gz");
        let contents = ArchiveContents::default();
        let mut manifest = ArchiveManifest::new("dev-9", &contents);
        manifest.format_version = archive::FORMAT_VERSION + 1;
        std::fs::write(&path, archive::encode(&manifest, &contents).unwrap()).unwrap();

        let f = fixture();
        assert!(matches!(
            f.packager.restore(&path).await,
            Err(Error::UnsupportedFormat(_))
        ));
        assert_eq!(
            f.packager.subscribe_restore().borrow().stage,
            RestoreStage::Failed
        );
        assert!(!f.packager.is_restoring());
    }

    #[tokio::test]
    async fn test_restore_rejects_orphans_before_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orphan.tar.gz");

        let project = Project::new("Kept");
        let orphan = Character::new("missing-project", "Nobody");
        let mut contents = ArchiveContents::default();
        contents.records.insert(
            EntityKind::Project,
            vec![inkboard_common::RecordEnvelope::new(Record::Project(project), None)],
        );
        contents.records.insert(
            EntityKind::Character,
            vec![inkboard_common::RecordEnvelope::new(Record::Character(orphan), None)],
        );
        let manifest = ArchiveManifest::new("dev-2", &contents);
        std::fs::write(&path, archive::encode(&manifest, &contents).unwrap()).unwrap();

        let f = fixture();
        assert!(matches!(
            f.packager.restore(&path).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(f.store.count(EntityKind::Project).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_backup_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        // Renaming a file over a directory fails after the partial is written.
        let dest = dir.path().join("occupied");
        std::fs::create_dir(&dest).unwrap();

        let f = fixture();
        seed(&f.store).await;

        assert!(f.packager.backup(&dest).await.is_err());
        assert!(!partial_path(&dest).exists());
        assert_eq!(
            f.packager.subscribe_backup().borrow().stage,
            BackupStage::Failed
        );
        assert!(!f.packager.is_backing_up());
    }

    #[tokio::test]
    async fn test_one_operation_at_a_time() {
        let dir = TempDir::new().unwrap();
        let f = fixture();

        let guard = f.packager.begin(Operation::Restore).unwrap();
        assert!(f.packager.is_restoring());
        assert!(matches!(
            f.packager.backup(dir.path().join("b.tar.gz")).await,
            Err(Error::Busy(_))
        ));

        drop(guard);
        assert!(!f.packager.is_restoring());
        f.packager.backup(dir.path().join("b.tar.gz")).await.unwrap();
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/out.tar.gz")),
            PathBuf::from("/tmp/out.tar.gz.partial")
        );
    }
}
