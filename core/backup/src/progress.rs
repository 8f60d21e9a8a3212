//! Backup and restore progress snapshots.

use std::fmt;

use inkboard_common::EntityKind;

fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = (processed as f64 / total as f64 * 100.0).round();
    value.clamp(0.0, 100.0) as u8
}

/// Record groups reported while exporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportGroup {
    Projects,
    Characters,
    Images,
}

impl ExportGroup {
    /// Export order.
    pub const ALL: [ExportGroup; 3] = [Self::Projects, Self::Characters, Self::Images];

    /// Record kinds exported under this group, parents first.
    pub fn kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|kind| Self::for_kind(*kind) == *self)
            .collect()
    }

    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Project | EntityKind::Edition | EntityKind::Page | EntityKind::Panel => {
                Self::Projects
            }
            EntityKind::Character | EntityKind::Section | EntityKind::CanvasItem => {
                Self::Characters
            }
            EntityKind::Image => Self::Images,
        }
    }
}

impl fmt::Display for ExportGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Projects => "projects",
            Self::Characters => "characters",
            Self::Images => "images",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupStage {
    #[default]
    Idle,
    Preparing,
    Exporting(ExportGroup),
    Packaging,
    Complete,
    Failed,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Preparing => f.write_str("preparing"),
            Self::Exporting(group) => write!(f, "exporting {}", group),
            Self::Packaging => f.write_str("packaging"),
            Self::Complete => f.write_str("complete"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Backup progress. `processed`/`total` count records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackupProgress {
    pub stage: BackupStage,
    /// Human readable description of the current stage.
    pub message: String,
    pub processed: usize,
    pub total: usize,
}

impl BackupProgress {
    pub fn percent(&self) -> u8 {
        match self.stage {
            BackupStage::Complete => 100,
            _ => percent(self.processed, self.total),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreStage {
    #[default]
    Idle,
    Reading,
    Validating,
    Importing(EntityKind),
    Complete,
    Failed,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Reading => f.write_str("reading"),
            Self::Validating => f.write_str("validating"),
            Self::Importing(kind) => write!(f, "importing {}", kind),
            Self::Complete => f.write_str("complete"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Restore progress. `processed`/`total` count records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestoreProgress {
    pub stage: RestoreStage,
    pub message: String,
    pub processed: usize,
    pub total: usize,
}

impl RestoreProgress {
    pub fn percent(&self) -> u8 {
        match self.stage {
            RestoreStage::Complete => 100,
            _ => percent(self.processed, self.total),
        }
    }
}
