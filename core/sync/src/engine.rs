//! Core sync engine that orchestrates all sync operations.
//!
//! A pass runs `connect → analyze → check → compare → resolve → transfer →
//! finalize`. Only one pass is active at a time. With the `ask` strategy a
//! pass stops after compare and waits, as a paused pass, until
//! [`SyncEngine::resolve_conflicts`] or [`SyncEngine::cancel_conflicts`]
//! is called with the batch token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use inkboard_common::{
    bytes_hash, Collection, EntityKind, Error, ErrorCode, ManifestEntry, RecordEnvelope, Result,
};
use inkboard_storage::{FileStorage, LocalRepository, RemoteAccount, RemoteSession};

use crate::conflict::{ConflictBatch, ConflictRecord, ConflictResolver, Resolution};
use crate::diff::{diff_records, missing_assets, nothing_changed};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::scheduler::SyncTrigger;
use crate::session::{CounterGroup, SyncFailure, SyncReport, SyncSession, SyncStage};
use crate::settings::{SyncSettings, SyncSettingsStore, Watermarks};

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry policy applied to every remote call.
    pub retry: RetryConfig,
    /// How long a conflict prompt may stay unanswered before the next
    /// sync request cancels it.
    pub conflict_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            conflict_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Options for a single pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Compare everything even if nothing seems to have changed.
    pub force: bool,
}

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotConnected,
    NothingChanged,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
    /// Paused until the batch is resolved or cancelled.
    AwaitingResolution(ConflictBatch),
    Cancelled,
    Failed(SyncFailure),
}

struct PendingConflict {
    kind: EntityKind,
    watermark: Option<DateTime<Utc>>,
    record: ConflictRecord,
}

/// Work decided by compare, carried across a pause.
struct Plan {
    started_at: DateTime<Utc>,
    clock: Instant,
    uploads: BTreeMap<EntityKind, Vec<String>>,
    downloads: BTreeMap<EntityKind, Vec<String>>,
    // Remote payloads already fetched while comparing.
    fetched: HashMap<String, RecordEnvelope>,
    conflicts: Vec<PendingConflict>,
    asset_uploads: Vec<String>,
    remote_assets: HashMap<String, ManifestEntry>,
    held: Watermarks,
    report: SyncReport,
}

impl Plan {
    fn new(started_at: DateTime<Utc>, clock: Instant) -> Self {
        Self {
            started_at,
            clock,
            uploads: BTreeMap::new(),
            downloads: BTreeMap::new(),
            fetched: HashMap::new(),
            conflicts: Vec::new(),
            asset_uploads: Vec::new(),
            remote_assets: HashMap::new(),
            held: Watermarks::default(),
            report: SyncReport::default(),
        }
    }
}

struct Paused {
    batch: ConflictBatch,
    plan: Plan,
}

enum PassState {
    Idle,
    Running,
    Paused(Box<Paused>),
}

enum Step {
    Done(SyncOutcome),
    Paused(Box<Paused>),
}

enum Prepared {
    NothingChanged,
    Ready(Plan),
}

/// Marks the engine busy for the lifetime of a pass.
///
/// Dropping it, even when the pass future is abandoned, returns the engine
/// to idle unless the pass was paused.
struct ActivePass<'a> {
    engine: &'a SyncEngine,
    paused: Option<Box<Paused>>,
}

impl Drop for ActivePass<'_> {
    fn drop(&mut self) {
        let next = match self.paused.take() {
            Some(paused) => PassState::Paused(paused),
            None => PassState::Idle,
        };
        *self.engine.lock_state() = next;
    }
}

/// Main sync engine for coordinating dataset synchronization.
pub struct SyncEngine {
    local: Arc<dyn LocalRepository>,
    files: Arc<dyn FileStorage>,
    remote: Arc<dyn RemoteSession>,
    settings: Arc<SyncSettingsStore>,
    retry: RetryExecutor,
    config: SyncConfig,
    state: Mutex<PassState>,
    progress: watch::Sender<SyncSession>,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(
        local: Arc<dyn LocalRepository>,
        files: Arc<dyn FileStorage>,
        remote: Arc<dyn RemoteSession>,
        settings: Arc<SyncSettingsStore>,
        config: SyncConfig,
    ) -> Self {
        let (progress, _) = watch::channel(SyncSession::default());
        Self {
            local,
            files,
            remote,
            settings,
            retry: RetryExecutor::new(config.retry.clone()),
            config,
            state: Mutex::new(PassState::Idle),
            progress,
        }
    }

    pub fn settings(&self) -> &Arc<SyncSettingsStore> {
        &self.settings
    }

    /// Observe progress snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SyncSession> {
        self.progress.subscribe()
    }

    /// Latest progress snapshot.
    pub fn session(&self) -> SyncSession {
        self.progress.borrow().clone()
    }

    /// Whether a pass is running or paused on conflicts.
    pub fn is_syncing(&self) -> bool {
        !matches!(*self.lock_state(), PassState::Idle)
    }

    /// Conflicts of the paused pass, if any.
    pub fn pending_conflicts(&self) -> Option<ConflictBatch> {
        match &*self.lock_state() {
            PassState::Paused(paused) => Some(paused.batch.clone()),
            _ => None,
        }
    }

    /// Whether a paused pass has outlived `conflict_timeout`. The next
    /// `sync()` cancels such a batch instead of being rejected.
    pub fn has_expired_conflicts(&self) -> bool {
        match &*self.lock_state() {
            PassState::Paused(paused) => self.is_expired(&paused.batch),
            _ => false,
        }
    }

    fn is_expired(&self, batch: &ConflictBatch) -> bool {
        let timeout = chrono::Duration::from_std(self.config.conflict_timeout)
            .unwrap_or(chrono::Duration::MAX);
        batch.is_expired(timeout, Utc::now())
    }

    fn lock_state(&self) -> MutexGuard<'_, PassState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a remote session and remember the account.
    ///
    /// # Errors
    /// - `AUTH_FAILED` on any failure; settings are left untouched
    pub async fn connect(&self) -> Result<RemoteAccount> {
        self.progress.send_modify(|s| s.is_connecting = true);
        let result = self.retry.execute(|| self.remote.connect()).await;
        self.progress.send_modify(|s| s.is_connecting = false);

        match result {
            Ok(account) => {
                self.settings
                    .set_connection(Some(account.email.clone()))
                    .await?;
                info!("Connected to {} remote as {}", self.remote.name(), account.email);
                Ok(account)
            }
            Err(e) => {
                warn!("Connecting to {} remote failed: {}", self.remote.name(), e);
                match e.code() {
                    Some(ErrorCode::AuthFailed) => Err(e),
                    _ => Err(Error::remote(
                        ErrorCode::AuthFailed,
                        format!("Could not connect: {}", e),
                    )),
                }
            }
        }
    }

    /// Forget the account. A paused pass is cancelled.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            if let PassState::Paused(paused) = &*state {
                info!("Dropping conflict batch {} on disconnect", paused.batch.id);
                *state = PassState::Idle;
            }
        }
        self.progress.send_replace(SyncSession::default());
        self.settings.set_connection(None).await?;
        info!("Disconnected from {} remote", self.remote.name());
        Ok(())
    }

    /// Run a sync pass.
    ///
    /// Pass failures are reported as [`SyncOutcome::Failed`]; `Err` is only
    /// returned when another pass is active.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncOutcome> {
        self.begin()?;
        let mut pass = ActivePass {
            engine: self,
            paused: None,
        };

        let outcome = match self.run_pass(options).await {
            Step::Done(outcome) => outcome,
            Step::Paused(paused) => {
                let batch = paused.batch.clone();
                pass.paused = Some(paused);
                SyncOutcome::AwaitingResolution(batch)
            }
        };
        Ok(outcome)
    }

    /// Resume a paused pass with one decision per conflict, in batch order.
    ///
    /// # Errors
    /// - `InvalidInput` for an unknown token or a wrong number of decisions
    pub async fn resolve_conflicts(
        &self,
        batch_id: &str,
        decisions: Vec<Resolution>,
    ) -> Result<SyncOutcome> {
        let paused = self.take_paused(batch_id, Some(decisions.as_slice()))?;
        let _pass = ActivePass {
            engine: self,
            paused: None,
        };

        info!(
            "Resuming pass with {} decisions for batch {}",
            decisions.len(),
            batch_id
        );
        Ok(self.apply_and_transfer(paused.plan, decisions).await)
    }

    /// Abort a paused pass. Nothing is transferred and no watermark moves.
    pub async fn cancel_conflicts(&self, batch_id: &str) -> Result<SyncOutcome> {
        let paused = self.take_paused(batch_id, None)?;
        *self.lock_state() = PassState::Idle;

        info!(
            "Cancelled pass with {} unresolved conflicts",
            paused.batch.len()
        );
        self.progress.send_modify(|s| {
            s.is_syncing = false;
            s.stage = SyncStage::Idle;
        });
        Ok(SyncOutcome::Cancelled)
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.lock_state();
        match &*state {
            PassState::Idle => {}
            PassState::Running => {
                return Err(Error::Busy("A sync pass is already running".to_string()));
            }
            PassState::Paused(paused) => {
                if !self.is_expired(&paused.batch) {
                    return Err(Error::Busy("Conflicts are awaiting resolution".to_string()));
                }
                warn!(
                    "Conflict batch {} left unanswered, cancelling it",
                    paused.batch.id
                );
            }
        }
        *state = PassState::Running;
        Ok(())
    }

    fn take_paused(&self, batch_id: &str, decisions: Option<&[Resolution]>) -> Result<Box<Paused>> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, PassState::Running) {
            PassState::Paused(paused) if paused.batch.id == batch_id => {
                if let Some(decisions) = decisions {
                    if let Err(e) = paused.batch.validate(decisions) {
                        *state = PassState::Paused(paused);
                        return Err(e);
                    }
                }
                Ok(paused)
            }
            other => {
                let err = match &other {
                    PassState::Paused(_) => {
                        Error::InvalidInput(format!("Unknown conflict batch: {}", batch_id))
                    }
                    PassState::Running => {
                        Error::Busy("A sync pass is already running".to_string())
                    }
                    PassState::Idle => Error::InvalidInput("No conflicts are pending".to_string()),
                };
                *state = other;
                Err(err)
            }
        }
    }

    fn set_stage(&self, stage: SyncStage) {
        debug!("Sync stage: {}", stage);
        self.progress.send_modify(|s| s.stage = stage);
    }

    fn bump(&self, group: CounterGroup) {
        self.progress
            .send_modify(|s| s.counter_mut(group).processed += 1);
    }

    fn add_total(&self, group: CounterGroup, n: usize) {
        if n > 0 {
            self.progress.send_modify(|s| s.counter_mut(group).total += n);
        }
    }

    async fn run_pass(&self, options: SyncOptions) -> Step {
        let settings = self.settings.get();
        if !settings.is_connected() {
            debug!("Not connected, skipping sync");
            return Step::Done(SyncOutcome::Skipped(SkipReason::NotConnected));
        }

        let started_at = Utc::now();
        self.progress.send_replace(SyncSession {
            is_connecting: true,
            is_syncing: true,
            stage: SyncStage::Connecting,
            started_at: Some(started_at),
            ..SyncSession::default()
        });
        info!("Sync pass started (force: {})", options.force);

        let plan = match self.prepare(options, &settings, started_at).await {
            Ok(Prepared::Ready(plan)) => plan,
            Ok(Prepared::NothingChanged) => {
                return Step::Done(self.finish_unchanged(started_at).await);
            }
            Err(e) => return Step::Done(self.fail(e)),
        };

        if plan.conflicts.is_empty() {
            return Step::Done(self.apply_and_transfer(plan, Vec::new()).await);
        }

        let records: Vec<ConflictRecord> =
            plan.conflicts.iter().map(|c| c.record.clone()).collect();
        let resolver = ConflictResolver::new(settings.conflict_strategy);

        match resolver.resolve_all(&records) {
            Some(decisions) => {
                info!(
                    "Resolved {} conflicts with strategy {}",
                    decisions.len(),
                    resolver.strategy()
                );
                Step::Done(self.apply_and_transfer(plan, decisions).await)
            }
            None => {
                let batch = ConflictBatch::new(records);
                info!(
                    "{} conflicts awaiting a decision (batch {})",
                    batch.len(),
                    batch.id
                );
                self.set_stage(SyncStage::Resolving);
                Step::Paused(Box::new(Paused { batch, plan }))
            }
        }
    }

    async fn prepare(
        &self,
        options: SyncOptions,
        settings: &SyncSettings,
        started_at: DateTime<Utc>,
    ) -> Result<Prepared> {
        let clock = Instant::now();
        self.retry.execute(|| self.remote.connect()).await?;

        self.progress.send_modify(|s| {
            s.is_connecting = false;
            s.stage = SyncStage::Analyzing;
        });
        let mut local = BTreeMap::new();
        for kind in EntityKind::ALL {
            local.insert(kind, self.local.manifest(kind).await?);
        }
        let local_assets: HashSet<String> = self.files.list().await?.into_iter().collect();
        let referenced = self.referenced_assets().await?;

        self.set_stage(SyncStage::Checking);
        let mut remote = BTreeMap::new();
        for kind in EntityKind::ALL {
            let collection = Collection::Records(kind);
            let manifest = self
                .retry
                .execute(|| self.remote.list_manifest(collection))
                .await?;
            remote.insert(kind, manifest);
        }
        let remote_assets: HashMap<String, ManifestEntry> = self
            .retry
            .execute(|| self.remote.list_manifest(Collection::Assets))
            .await?
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        let remote_asset_ids: HashSet<String> = remote_assets.keys().cloned().collect();
        let asset_uploads = missing_assets(
            local_assets.iter().map(String::as_str),
            &remote_asset_ids,
            &referenced,
        );

        let watermarks = self.settings.watermarks();
        if !options.force && watermarks.is_empty() && asset_uploads.is_empty() {
            if let Some(watermark) = settings.last_sync_at {
                let unchanged = EntityKind::ALL
                    .iter()
                    .all(|kind| nothing_changed(&local[kind], &remote[kind], watermark));
                if unchanged {
                    return Ok(Prepared::NothingChanged);
                }
            }
        }

        self.set_stage(SyncStage::Comparing);
        let mut plan = Plan::new(started_at, clock);
        for kind in EntityKind::ALL {
            let collection = Collection::Records(kind);
            let diff = diff_records(
                collection,
                &local[&kind],
                &remote[&kind],
                settings.last_sync_at,
                &watermarks,
            );
            debug!(
                "{}: {} up, {} down, {} conflicts, {} unchanged",
                kind,
                diff.uploads.len(),
                diff.downloads.len(),
                diff.conflicts.len(),
                diff.unchanged
            );

            plan.report.unchanged += diff.unchanged;
            plan.uploads
                .entry(kind)
                .or_default()
                .extend(diff.uploads.into_iter().map(|e| e.id));
            plan.downloads
                .entry(kind)
                .or_default()
                .extend(diff.downloads.into_iter().map(|e| e.id));

            for candidate in diff.conflicts {
                let local_version = self
                    .local
                    .get(kind, &candidate.local.id)
                    .await?
                    .ok_or_else(|| {
                        Error::NotFound(format!("{} {} vanished", kind, candidate.local.id))
                    })?;
                let remote_version = self.fetch_remote(kind, &candidate.remote.id).await?;

                plan.fetched
                    .insert(candidate.remote.id.clone(), remote_version.clone());
                plan.conflicts.push(PendingConflict {
                    kind,
                    watermark: candidate.watermark,
                    record: ConflictRecord::new(local_version, remote_version),
                });
            }
        }
        plan.asset_uploads = asset_uploads;
        plan.remote_assets = remote_assets;

        Ok(Prepared::Ready(plan))
    }

    async fn apply_and_transfer(&self, mut plan: Plan, decisions: Vec<Resolution>) -> SyncOutcome {
        let conflicts = std::mem::take(&mut plan.conflicts);
        for (conflict, decision) in conflicts.into_iter().zip(decisions) {
            let id = conflict.record.entity_id;
            match decision {
                Resolution::KeepLocal => {
                    plan.uploads.entry(conflict.kind).or_default().push(id);
                    plan.report.conflicts_resolved += 1;
                }
                Resolution::KeepRemote => {
                    plan.downloads.entry(conflict.kind).or_default().push(id);
                    plan.report.conflicts_resolved += 1;
                }
                Resolution::Skip => {
                    debug!("Skipping conflict on {} {}", conflict.kind, id);
                    plan.held.hold(
                        Collection::Records(conflict.kind),
                        id,
                        conflict.watermark.unwrap_or(DateTime::<Utc>::MIN_UTC),
                    );
                    plan.report.conflicts_skipped += 1;
                }
            }
        }

        match self.transfer(&mut plan).await {
            Ok(()) => self.finalize(plan).await,
            Err(e) => self.fail(e),
        }
    }

    async fn transfer(&self, plan: &mut Plan) -> Result<()> {
        for (kind, ids) in plan.uploads.iter().chain(plan.downloads.iter()) {
            self.add_total(CounterGroup::for_collection(Collection::Records(*kind)), ids.len());
        }
        self.add_total(CounterGroup::Files, plan.asset_uploads.len());

        self.set_stage(SyncStage::Uploading);
        for (kind, ids) in &plan.uploads {
            let group = CounterGroup::for_collection(Collection::Records(*kind));
            for id in ids {
                if self.upload_record(*kind, id).await? {
                    plan.report.uploaded += 1;
                }
                self.bump(group);
            }
        }
        for path in &plan.asset_uploads {
            if self.upload_asset(path).await? {
                plan.report.assets_uploaded += 1;
            }
            self.bump(CounterGroup::Files);
        }

        self.set_stage(SyncStage::Downloading);
        for (kind, ids) in &plan.downloads {
            let group = CounterGroup::for_collection(Collection::Records(*kind));
            for id in ids {
                let envelope = match plan.fetched.remove(id) {
                    Some(envelope) => envelope,
                    None => self.fetch_remote(*kind, id).await?,
                };
                self.local.import(envelope).await?;
                plan.report.downloaded += 1;
                self.bump(group);
            }
        }

        // Referenced set is taken after record downloads so new images count.
        let referenced = self.referenced_assets().await?;
        let present: HashSet<String> = self.files.list().await?.into_iter().collect();
        let asset_downloads = missing_assets(
            plan.remote_assets.keys().map(String::as_str),
            &present,
            &referenced,
        );
        self.add_total(CounterGroup::Files, asset_downloads.len());
        for path in asset_downloads {
            let bytes = self
                .retry
                .execute(|| self.remote.download(Collection::Assets, &path))
                .await?;
            if let Some(entry) = plan.remote_assets.get(&path) {
                if bytes_hash(&bytes) != entry.content_hash {
                    return Err(Error::remote(
                        ErrorCode::InvalidData,
                        format!("Asset {} does not match its manifest hash", path),
                    ));
                }
            }
            self.files.save(&path, bytes).await?;
            plan.report.assets_downloaded += 1;
            self.bump(CounterGroup::Files);
        }

        Ok(())
    }

    async fn upload_record(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let Some(envelope) = self.local.get(kind, id).await? else {
            debug!("{} {} was deleted before upload", kind, id);
            return Ok(false);
        };
        let entry = envelope.manifest_entry()?;
        let payload = envelope.to_bytes()?;
        let collection = Collection::Records(kind);

        self.retry
            .execute(|| self.remote.upload(collection, &entry, payload.clone()))
            .await?;
        debug!("Uploaded {} {}", kind, id);
        Ok(true)
    }

    async fn upload_asset(&self, path: &str) -> Result<bool> {
        let bytes = match self.files.load(path).await {
            Ok(bytes) => bytes,
            Err(Error::NotFound(_)) => {
                warn!("Asset {} disappeared before upload", path);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let entry = ManifestEntry {
            id: path.to_string(),
            updated_at: Utc::now(),
            content_hash: bytes_hash(&bytes),
            device_id: Some(self.local.device_id().to_string()),
        };

        self.retry
            .execute(|| self.remote.upload(Collection::Assets, &entry, bytes.clone()))
            .await?;
        debug!("Uploaded asset {} ({} bytes)", path, bytes.len());
        Ok(true)
    }

    /// Download and validate a remote record.
    async fn fetch_remote(&self, kind: EntityKind, id: &str) -> Result<RecordEnvelope> {
        let collection = Collection::Records(kind);
        let bytes = self
            .retry
            .execute(|| self.remote.download(collection, id))
            .await?;

        let envelope = RecordEnvelope::from_bytes(&bytes).map_err(|e| {
            Error::remote(
                ErrorCode::InvalidData,
                format!("Malformed remote {} {}: {}", kind, id, e),
            )
        })?;
        if envelope.record.kind() != kind || envelope.record.id() != id {
            return Err(Error::remote(
                ErrorCode::InvalidData,
                format!(
                    "Remote {} {} holds {} {}",
                    kind,
                    id,
                    envelope.record.kind(),
                    envelope.record.id()
                ),
            ));
        }
        Ok(envelope)
    }

    async fn referenced_assets(&self) -> Result<HashSet<String>> {
        Ok(self
            .local
            .list(EntityKind::Image)
            .await?
            .iter()
            .filter_map(|envelope| envelope.record.as_image())
            .flat_map(|image| image.asset_paths())
            .map(str::to_string)
            .collect())
    }

    async fn finish_unchanged(&self, started_at: DateTime<Utc>) -> SyncOutcome {
        self.set_stage(SyncStage::Finalizing);
        if let Err(e) = self
            .settings
            .record_pass(started_at, Watermarks::default())
            .await
        {
            return self.fail(e);
        }
        self.progress.send_modify(|s| {
            s.is_syncing = false;
            s.stage = SyncStage::Complete;
        });
        info!("Nothing changed since last sync");
        SyncOutcome::Skipped(SkipReason::NothingChanged)
    }

    async fn finalize(&self, mut plan: Plan) -> SyncOutcome {
        self.set_stage(SyncStage::Finalizing);
        let held = std::mem::take(&mut plan.held);
        if let Err(e) = self.settings.record_pass(plan.started_at, held).await {
            return self.fail(e);
        }

        plan.report.duration = plan.clock.elapsed();
        self.progress.send_modify(|s| {
            s.is_syncing = false;
            s.stage = SyncStage::Complete;
        });
        info!(
            "Sync pass complete in {:?}: {} up, {} down, {} assets up, {} assets down, {} conflicts resolved, {} skipped",
            plan.report.duration,
            plan.report.uploaded,
            plan.report.downloaded,
            plan.report.assets_uploaded,
            plan.report.assets_downloaded,
            plan.report.conflicts_resolved,
            plan.report.conflicts_skipped
        );
        SyncOutcome::Completed(plan.report)
    }

    fn fail(&self, err: Error) -> SyncOutcome {
        let failure = SyncFailure::from_error(&err);
        error!("Sync pass failed: {}", err);
        self.progress.send_modify(|s| {
            s.is_connecting = false;
            s.is_syncing = false;
            s.stage = SyncStage::Failed;
            s.last_error = Some(failure.clone());
        });
        SyncOutcome::Failed(failure)
    }
}

#[async_trait]
impl SyncTrigger for SyncEngine {
    fn is_syncing(&self) -> bool {
        SyncEngine::is_syncing(self)
    }

    fn has_expired_pause(&self) -> bool {
        self.has_expired_conflicts()
    }

    async fn run_sync(&self) {
        match self.sync(SyncOptions::default()).await {
            Ok(SyncOutcome::Failed(failure)) => warn!("Automatic sync failed: {}", failure),
            Ok(SyncOutcome::AwaitingResolution(batch)) => {
                info!("Automatic sync paused on {} conflicts", batch.len())
            }
            Ok(outcome) => debug!("Automatic sync finished: {:?}", outcome),
            Err(e) => debug!("Automatic sync not started: {}", e),
        }
    }
}
