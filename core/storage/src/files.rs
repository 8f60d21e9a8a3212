//! Binary asset storage trait definition.

use async_trait::async_trait;

use inkboard_common::{Error, Result};

/// Storage for binary assets (image originals and thumbnails).
///
/// Paths are relative, `/`-separated storage paths as recorded on entity
/// records, e.g. `images/<image-id>/<hash>-original.png`.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Write an asset, replacing any existing content at `path`.
    async fn save(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// Read an asset.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored at `path`
    async fn load(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete an asset. Deleting a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if an asset exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// List every stored asset path.
    async fn list(&self) -> Result<Vec<String>>;
}

/// Validate a storage path.
///
/// # Errors
/// - empty path, absolute path, empty components, `.` or `..` components,
///   or backslashes
pub fn validate_asset_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidInput("Asset path cannot be empty".to_string()));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "Asset path must be relative and '/'-separated: {}",
            path
        )));
    }
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(Error::InvalidInput(format!(
                "Invalid asset path component in {}",
                path
            )));
        }
    }
    Ok(())
}
