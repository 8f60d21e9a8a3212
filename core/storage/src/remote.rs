//! Remote session trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;

use inkboard_common::{Collection, Error, ErrorCode, ManifestEntry, Result};

/// Identity of the connected remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccount {
    pub email: String,
}

/// Client for the remote copy of the dataset.
///
/// Authentication is the implementation's concern; every call may fail
/// with `Error::Remote` carrying one of the defined codes. Implementations
/// apply their own request-level timeouts.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Provider name (e.g. "folder", "memory").
    fn name(&self) -> &str;

    /// Establish or validate the session.
    ///
    /// # Errors
    /// - `AUTH_FAILED` when credentials are missing or rejected
    async fn connect(&self) -> Result<RemoteAccount>;

    /// Manifest of everything stored remotely in a collection.
    async fn list_manifest(&self, collection: Collection) -> Result<Vec<ManifestEntry>>;

    /// Store an object, indexing it under `entry`.
    async fn upload(&self, collection: Collection, entry: &ManifestEntry, payload: Vec<u8>)
        -> Result<()>;

    /// Fetch an object's payload.
    async fn download(&self, collection: Collection, id: &str) -> Result<Vec<u8>>;
}

/// Map a transport-level I/O failure onto a remote error code.
pub fn classify_io_error(err: &io::Error) -> ErrorCode {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorCode::AuthFailed,
        io::ErrorKind::StorageFull => ErrorCode::StorageFull,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ErrorCode::InvalidData,
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::NetworkDown
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => ErrorCode::NetworkError,
        _ => ErrorCode::Unknown,
    }
}

/// Wrap an I/O failure as a coded remote error.
pub fn remote_io_error(context: &str, err: io::Error) -> Error {
    Error::remote(classify_io_error(&err), format!("{}: {}", context, err))
}
