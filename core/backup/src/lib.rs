//! Inkboard Backup
//!
//! Whole-dataset backup into a single gzip tar archive and restore from it.

pub mod archive;
pub mod packager;
pub mod progress;

pub use archive::{ArchiveContents, ArchiveManifest, FORMAT_VERSION};
pub use packager::{BackupReport, Packager, RestoreReport};
pub use progress::{BackupProgress, BackupStage, ExportGroup, RestoreProgress, RestoreStage};
