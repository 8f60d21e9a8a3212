//! Local and remote storage for Inkboard.
//!
//! This crate holds both sides of synchronization:
//! - The on-device entity store (`LocalRepository`, backed by SQLite)
//!   and its binary asset area (`FileStorage`)
//! - The remote side (`RemoteSession`), with a directory-backed
//!   implementation and in-memory doubles for tests
//!
//! # Design Principles
//! - Sync and backup code only sees the traits, never SQLite or paths
//! - Remote failures always carry an `ErrorCode`
//! - Writes that touch both records and assets never leave orphaned assets

pub mod events;
pub mod files;
pub mod folder;
pub mod local;
pub mod memory;
pub mod remote;
pub mod repository;
pub mod sqlite;

pub use events::{ChangeNotifier, LocalChange};
pub use files::{validate_asset_path, FileStorage};
pub use folder::FolderRemote;
pub use local::LocalFileStorage;
pub use memory::{MemoryFileStorage, MemoryRemote, RemoteCall, RemoteOp};
pub use remote::{classify_io_error, remote_io_error, RemoteAccount, RemoteSession};
pub use repository::{KeyValueStore, LocalRepository};
pub use sqlite::LocalStore;
