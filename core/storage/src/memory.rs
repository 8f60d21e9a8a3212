//! In-memory file storage and remote session for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use crate::files::{validate_asset_path, FileStorage};
use crate::remote::{RemoteAccount, RemoteSession};
use inkboard_common::{Collection, Error, ErrorCode, ManifestEntry, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory asset storage.
///
/// All data is stored in memory and lost on drop.
#[derive(Default)]
pub struct MemoryFileStorage {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_saves: Mutex<usize>,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` saves fail with a storage error.
    pub fn fail_next_saves(&self, times: usize) {
        *lock(&self.fail_saves) = times;
    }

    /// Number of stored assets.
    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn save(&self, path: &str, data: Vec<u8>) -> Result<()> {
        validate_asset_path(path)?;
        {
            let mut remaining = lock(&self.fail_saves);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Storage(format!("Injected save failure: {}", path)));
            }
        }
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), data);
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Asset not found: {}", path)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

/// Remote operations, for failure injection and call inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Connect,
    ListManifest,
    Upload,
    Download,
}

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub collection: Option<Collection>,
    pub id: Option<String>,
}

type Objects = HashMap<Collection, BTreeMap<String, (ManifestEntry, Vec<u8>)>>;

/// In-memory remote session.
///
/// Records every call and can be told to fail upcoming calls with a given
/// code, which makes it the workhorse of the sync tests.
pub struct MemoryRemote {
    account: Mutex<Option<String>>,
    objects: RwLock<Objects>,
    failures: Mutex<HashMap<RemoteOp, VecDeque<ErrorCode>>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MemoryRemote {
    /// Create a remote that accepts connections as `email`.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            account: Mutex::new(Some(email.into())),
            objects: RwLock::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a remote that rejects every connection.
    pub fn unauthenticated() -> Self {
        let remote = Self::new("");
        *lock(&remote.account) = None;
        remote
    }

    /// Fail the next `times` calls of `op` with `code`.
    pub fn fail_next(&self, op: RemoteOp, code: ErrorCode, times: usize) {
        let mut failures = lock(&self.failures);
        let queue = failures.entry(op).or_default();
        queue.extend(std::iter::repeat(code).take(times));
    }

    /// Store an object directly, bypassing call recording.
    pub fn insert(&self, collection: Collection, entry: ManifestEntry, payload: Vec<u8>) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection)
            .or_default()
            .insert(entry.id.clone(), (entry, payload));
    }

    /// Manifest entry of a stored object.
    pub fn entry(&self, collection: Collection, id: &str) -> Option<ManifestEntry> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&collection)
            .and_then(|objects| objects.get(id))
            .map(|(entry, _)| entry.clone())
    }

    /// Payload of a stored object.
    pub fn payload(&self, collection: Collection, id: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&collection)
            .and_then(|objects| objects.get(id))
            .map(|(_, payload)| payload.clone())
    }

    /// Number of objects in a collection.
    pub fn object_count(&self, collection: Collection) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls of one operation made so far.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, op: RemoteOp, collection: Option<Collection>, id: Option<&str>) -> Result<()> {
        lock(&self.calls).push(RemoteCall {
            op,
            collection,
            id: id.map(str::to_string),
        });

        let injected = lock(&self.failures)
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(code) => Err(Error::remote(code, format!("Injected {:?} failure", op))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSession for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<RemoteAccount> {
        self.record(RemoteOp::Connect, None, None)?;
        match lock(&self.account).clone() {
            Some(email) => Ok(RemoteAccount { email }),
            None => Err(Error::remote(ErrorCode::AuthFailed, "No account configured")),
        }
    }

    async fn list_manifest(&self, collection: Collection) -> Result<Vec<ManifestEntry>> {
        self.record(RemoteOp::ListManifest, Some(collection), None)?;
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&collection)
            .map(|objects| objects.values().map(|(entry, _)| entry.clone()).collect())
            .unwrap_or_default())
    }

    async fn upload(
        &self,
        collection: Collection,
        entry: &ManifestEntry,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.record(RemoteOp::Upload, Some(collection), Some(&entry.id))?;
        self.insert(collection, entry.clone(), payload);
        Ok(())
    }

    async fn download(&self, collection: Collection, id: &str) -> Result<Vec<u8>> {
        self.record(RemoteOp::Download, Some(collection), Some(id))?;
        self.payload(collection, id).ok_or_else(|| {
            Error::remote(
                ErrorCode::InvalidData,
                format!("Remote object missing: {}/{}", collection, id),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str) -> ManifestEntry {
        ManifestEntry {
            id: id.to_string(),
            updated_at: Utc::now(),
            content_hash: "h".to_string(),
            device_id: None,
        }
    }

    #[tokio::test]
    async fn test_memory_file_storage() {
        let storage = MemoryFileStorage::new();
        storage.save("a/b.png", vec![1, 2, 3]).await.unwrap();

        assert_eq!(storage.load("a/b.png").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(storage.list().await.unwrap(), vec!["a/b.png"]);

        storage.delete("a/b.png").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_memory_file_storage_injected_failure() {
        let storage = MemoryFileStorage::new();
        storage.fail_next_saves(1);

        assert!(storage.save("a.png", vec![1]).await.is_err());
        assert!(storage.save("a.png", vec![1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_remote_upload_download() {
        let remote = MemoryRemote::new("me@example.com");
        let collection = Collection::Assets;

        remote.upload(collection, &entry("x"), vec![9]).await.unwrap();

        assert_eq!(remote.download(collection, "x").await.unwrap(), vec![9]);
        assert_eq!(remote.list_manifest(collection).await.unwrap().len(), 1);
        assert_eq!(remote.call_count(RemoteOp::Upload), 1);
    }

    #[tokio::test]
    async fn test_memory_remote_injected_failures() {
        let remote = MemoryRemote::new("me@example.com");
        remote.fail_next(RemoteOp::Connect, ErrorCode::NetworkError, 2);

        for _ in 0..2 {
            let err = remote.connect().await.unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::NetworkError));
        }
        assert_eq!(remote.connect().await.unwrap().email, "me@example.com");
        assert_eq!(remote.call_count(RemoteOp::Connect), 3);
    }

    #[tokio::test]
    async fn test_unauthenticated_remote() {
        let remote = MemoryRemote::unauthenticated();
        let err = remote.connect().await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::AuthFailed));
    }
}
