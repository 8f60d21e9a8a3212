//! Progress of the sync pass in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use inkboard_common::{Collection, EntityKind, Error, ErrorCode};

/// Stage of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    #[default]
    Idle,
    Connecting,
    Analyzing,
    Checking,
    Comparing,
    /// Paused, waiting for conflict decisions.
    Resolving,
    Uploading,
    Downloading,
    Finalizing,
    Complete,
    Failed,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Analyzing => "analyzing",
            Self::Checking => "checking",
            Self::Comparing => "comparing",
            Self::Resolving => "resolving",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A processed/total pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counter {
    pub processed: usize,
    pub total: usize,
}

impl Counter {
    /// `round(processed / total * 100)`, 0 when there is nothing to do.
    pub fn percent(&self) -> u8 {
        percent(self.processed, self.total)
    }
}

/// Rounded completion percentage, 0 when `total` is 0.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = (processed as f64 / total as f64 * 100.0).round();
    value.clamp(0.0, 100.0) as u8
}

/// Progress counter groups shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterGroup {
    /// Projects and their script tree.
    Projects,
    /// Characters, sections and canvas items.
    Characters,
    /// Image records.
    Images,
    /// Binary assets.
    Files,
}

impl CounterGroup {
    pub fn for_collection(collection: Collection) -> Self {
        match collection {
            Collection::Records(
                EntityKind::Project | EntityKind::Edition | EntityKind::Page | EntityKind::Panel,
            ) => Self::Projects,
            Collection::Records(
                EntityKind::Character | EntityKind::Section | EntityKind::CanvasItem,
            ) => Self::Characters,
            Collection::Records(EntityKind::Image) => Self::Images,
            Collection::Assets => Self::Files,
        }
    }
}

/// A pass failure as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub code: ErrorCode,
    pub message: String,
    pub user_message: String,
}

impl SyncFailure {
    pub fn from_error(err: &Error) -> Self {
        let code = err.code().unwrap_or(ErrorCode::Unknown);
        Self {
            code,
            message: err.to_string(),
            user_message: user_message(code).to_string(),
        }
    }
}

fn user_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::AuthFailed => "Your remote session has expired. Reconnect to resume syncing.",
        ErrorCode::InvalidData => {
            "The remote rejected some data. Nothing was discarded on this device."
        }
        ErrorCode::StorageFull => "Remote storage is full. Free up space to resume syncing.",
        ErrorCode::NetworkError | ErrorCode::RateLimited | ErrorCode::Unknown => {
            "Sync failed, will retry next interval."
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_message, self.code)
    }
}

/// Snapshot of the pass in flight.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncSession {
    pub is_connecting: bool,
    pub is_syncing: bool,
    pub stage: SyncStage,
    pub projects: Counter,
    pub characters: Counter,
    pub images: Counter,
    pub files: Counter,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<SyncFailure>,
}

impl SyncSession {
    pub fn counter_mut(&mut self, group: CounterGroup) -> &mut Counter {
        match group {
            CounterGroup::Projects => &mut self.projects,
            CounterGroup::Characters => &mut self.characters,
            CounterGroup::Images => &mut self.images,
            CounterGroup::Files => &mut self.files,
        }
    }

    pub fn counter(&self, group: CounterGroup) -> Counter {
        match group {
            CounterGroup::Projects => self.projects,
            CounterGroup::Characters => self.characters,
            CounterGroup::Images => self.images,
            CounterGroup::Files => self.files,
        }
    }

    /// Overall completion across all groups.
    pub fn percent(&self) -> u8 {
        let groups = [self.projects, self.characters, self.images, self.files];
        let processed = groups.iter().map(|c| c.processed).sum();
        let total = groups.iter().map(|c| c.total).sum();
        percent(processed, total)
    }
}

/// Summary of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub assets_uploaded: usize,
    pub assets_downloaded: usize,
    pub unchanged: usize,
    pub conflicts_resolved: usize,
    pub conflicts_skipped: usize,
    pub duration: Duration,
}

impl SyncReport {
    pub fn transferred(&self) -> usize {
        self.uploaded + self.downloaded + self.assets_uploaded + self.assets_downloaded
    }
}
