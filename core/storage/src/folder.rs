//! Remote session backed by a plain directory.
//!
//! Lets a synced folder (a mounted share, a cloud-drive client folder)
//! act as the remote. Layout:
//!
//! ```text
//! <root>/account.json                  {"email": "..."}
//! <root>/<collection>/manifest.json    id -> ManifestEntry
//! <root>/<collection>/<sha256(id)>     payload
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::remote::{remote_io_error, RemoteAccount, RemoteSession};
use inkboard_common::{bytes_hash, Collection, Error, ErrorCode, ManifestEntry, Result};

const ACCOUNT_FILE: &str = "account.json";
const MANIFEST_FILE: &str = "manifest.json";

type Manifest = BTreeMap<String, ManifestEntry>;

/// Remote session over a directory tree.
pub struct FolderRemote {
    root: PathBuf,
    // Serializes read-modify-write of manifest files.
    manifest_lock: Mutex<()>,
}

impl FolderRemote {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            manifest_lock: Mutex::new(()),
        }
    }

    /// Prepare `root` as a remote owned by `email`.
    pub async fn initialize(root: impl AsRef<Path>, email: &str) -> Result<Self> {
        let remote = Self::new(root);
        fs::create_dir_all(&remote.root)
            .await
            .map_err(|e| remote_io_error("create remote root", e))?;

        let account = RemoteAccount {
            email: email.to_string(),
        };
        let json = serde_json::to_vec_pretty(&account)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        write_atomic(&remote.root.join(ACCOUNT_FILE), &json).await?;

        info!("Initialized folder remote at {:?} for {}", remote.root, email);
        Ok(remote)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.as_str())
    }

    fn object_path(&self, collection: Collection, id: &str) -> PathBuf {
        self.collection_dir(collection).join(bytes_hash(id.as_bytes()))
    }

    async fn ensure_account(&self) -> Result<RemoteAccount> {
        let path = self.root.join(ACCOUNT_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::remote(
                    ErrorCode::AuthFailed,
                    format!("No remote account at {:?}", self.root),
                ));
            }
            Err(e) => return Err(remote_io_error("read account", e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::remote(ErrorCode::AuthFailed, format!("Unreadable account file: {}", e))
        })
    }

    async fn read_manifest(&self, collection: Collection) -> Result<Manifest> {
        let path = self.collection_dir(collection).join(MANIFEST_FILE);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::remote(
                    ErrorCode::InvalidData,
                    format!("Corrupt {} manifest: {}", collection, e),
                )
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Manifest::new()),
            Err(e) => Err(remote_io_error("read manifest", e)),
        }
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| remote_io_error("create directory", e))?;
    }

    let tmp = path.with_file_name(format!(".{}.tmp", Uuid::new_v4()));
    fs::write(&tmp, data)
        .await
        .map_err(|e| remote_io_error("write", e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(remote_io_error("rename", e));
    }
    Ok(())
}

#[async_trait]
impl RemoteSession for FolderRemote {
    fn name(&self) -> &str {
        "folder"
    }

    async fn connect(&self) -> Result<RemoteAccount> {
        let account = self.ensure_account().await?;
        debug!("Connected to folder remote as {}", account.email);
        Ok(account)
    }

    async fn list_manifest(&self, collection: Collection) -> Result<Vec<ManifestEntry>> {
        self.ensure_account().await?;
        Ok(self.read_manifest(collection).await?.into_values().collect())
    }

    async fn upload(
        &self,
        collection: Collection,
        entry: &ManifestEntry,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.ensure_account().await?;
        write_atomic(&self.object_path(collection, &entry.id), &payload).await?;

        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.read_manifest(collection).await?;
        manifest.insert(entry.id.clone(), entry.clone());
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        write_atomic(&self.collection_dir(collection).join(MANIFEST_FILE), &json).await?;

        debug!("Uploaded {}/{} ({} bytes)", collection, entry.id, payload.len());
        Ok(())
    }

    async fn download(&self, collection: Collection, id: &str) -> Result<Vec<u8>> {
        self.ensure_account().await?;
        match fs::read(self.object_path(collection, id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::remote(
                ErrorCode::InvalidData,
                format!("Remote object missing: {}/{}", collection, id),
            )),
            Err(e) => Err(remote_io_error("download", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inkboard_common::EntityKind;
    use tempfile::TempDir;

    fn entry(id: &str) -> ManifestEntry {
        ManifestEntry {
            id: id.to_string(),
            updated_at: Utc::now(),
            content_hash: bytes_hash(id.as_bytes()),
            device_id: Some("dev".into()),
        }
    }

    #[tokio::test]
    async fn test_uninitialized_folder_is_auth_failure() {
        let temp = TempDir::new().unwrap();
        let remote = FolderRemote::new(temp.path().join("nowhere"));

        let err = remote.connect().await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::AuthFailed));
    }

    #[tokio::test]
    async fn test_upload_list_download() {
        let temp = TempDir::new().unwrap();
        let remote = FolderRemote::initialize(temp.path(), "artist@example.com")
            .await
            .unwrap();
        assert_eq!(remote.connect().await.unwrap().email, "artist@example.com");

        let collection = Collection::Records(EntityKind::Project);
        remote.upload(collection, &entry("p1"), b"one".to_vec()).await.unwrap();
        remote.upload(collection, &entry("p2"), b"two".to_vec()).await.unwrap();

        let manifest = remote.list_manifest(collection).await.unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(remote.download(collection, "p2").await.unwrap(), b"two");
        assert!(remote
            .list_manifest(Collection::Assets)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_asset_paths_are_flattened() {
        let temp = TempDir::new().unwrap();
        let remote = FolderRemote::initialize(temp.path(), "a@b.c").await.unwrap();

        let path = "images/abc/0123-original.png";
        remote
            .upload(Collection::Assets, &entry(path), vec![7; 16])
            .await
            .unwrap();

        assert_eq!(remote.download(Collection::Assets, path).await.unwrap(), vec![7; 16]);
        assert!(!temp.path().join("assets").join("images").exists());
    }

    #[tokio::test]
    async fn test_missing_object_is_invalid_data() {
        let temp = TempDir::new().unwrap();
        let remote = FolderRemote::initialize(temp.path(), "a@b.c").await.unwrap();

        let err = remote
            .download(Collection::Records(EntityKind::Panel), "gone")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidData));
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_invalid_data() {
        let temp = TempDir::new().unwrap();
        let remote = FolderRemote::initialize(temp.path(), "a@b.c").await.unwrap();

        let dir = temp.path().join("project");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), b"{ nope").unwrap();

        let err = remote
            .list_manifest(Collection::Records(EntityKind::Project))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidData));
    }
}
