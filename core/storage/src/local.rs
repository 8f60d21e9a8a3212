//! Local filesystem asset storage.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::files::{validate_asset_path, FileStorage};
use inkboard_common::{Error, Result};

/// Stores assets as plain files below a root directory.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Create a new local storage with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, path: &str) -> Result<PathBuf> {
        validate_asset_path(path)?;
        let mut fs_path = self.root.clone();
        for component in path.split('/') {
            fs_path.push(component);
        }
        Ok(fs_path)
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let fs_path = self.to_fs_path(path)?;
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write next to the target, then rename, so readers never see a torn file.
        let tmp_path = fs_path.with_file_name(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, &data).await?;
        if let Err(e) = fs::rename(&tmp_path, &fs_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path)?;
        match fs::read(&fs_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Asset not found: {}", path)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let fs_path = self.to_fs_path(path)?;
        match fs::remove_file(&fs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let fs_path = self.to_fs_path(path)?;
        Ok(fs::try_exists(&fs_path).await?)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut results = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), relative));
                } else {
                    results.push(relative);
                }
            }
        }

        results.sort();
        Ok(results)
    }
}
