//! Inkboard Sync Engine
//!
//! This crate keeps the local dataset and its remote copy in step:
//! - Resilience executor with exponential backoff and coded retry policy
//! - Persisted sync settings and per-id watermarks
//! - Manifest comparison and conflict resolution
//! - The sync orchestrator with pausable conflict prompts
//! - Auto-sync scheduling on startup, interval and local changes

pub mod conflict;
pub mod diff;
pub mod engine;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod settings;

// Re-export main types
pub use conflict::{
    ConflictBatch, ConflictRecord, ConflictResolver, ConflictStrategy, ConflictVersion, Resolution,
};
pub use diff::{classify, diff_records, Action, CollectionDiff};
pub use engine::{SkipReason, SyncConfig, SyncEngine, SyncOptions, SyncOutcome};
pub use retry::{is_network_error, retry, retry_with_config, RetryConfig, RetryExecutor};
pub use scheduler::{AutoSyncOptions, SchedulerHandle, SyncScheduler, SyncTrigger};
pub use session::{percent, Counter, CounterGroup, SyncFailure, SyncReport, SyncSession, SyncStage};
pub use settings::{SettingsUpdate, SyncInterval, SyncSettings, SyncSettingsStore, Watermarks};
