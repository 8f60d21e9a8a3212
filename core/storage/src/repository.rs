//! Local repository trait definitions.

use async_trait::async_trait;

use inkboard_common::{EntityKind, Image, ManifestEntry, Record, RecordEnvelope, Result};

/// Access to the on-device entity store.
///
/// The sync and backup layers never touch storage except through this trait.
#[async_trait]
pub trait LocalRepository: Send + Sync {
    /// Identifier of this device, stamped on local writes.
    fn device_id(&self) -> &str;

    /// List all records of a kind.
    async fn list(&self, kind: EntityKind) -> Result<Vec<RecordEnvelope>>;

    /// Get a single record.
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<RecordEnvelope>>;

    /// Insert a new record, stamping `updated_at` and the device id.
    ///
    /// # Errors
    /// - `AlreadyExists` if the id is taken
    /// - `NotFound` if the parent record does not exist
    async fn create(&self, record: Record) -> Result<Record>;

    /// Replace an existing record, stamping `updated_at` and the device id.
    ///
    /// # Errors
    /// - `NotFound` if no record of that kind has the id
    async fn update(&self, record: Record) -> Result<Record>;

    /// Insert or replace a record exactly as given, timestamps included.
    ///
    /// Used for records downloaded from the remote. Publishes no local change.
    async fn import(&self, envelope: RecordEnvelope) -> Result<()>;

    /// Put an archived record in place of any local record with its id.
    ///
    /// The local record and its subtree are removed and the archived one
    /// written in a single step, so a failure leaves the local copy intact.
    /// The given assets are written first and removed again on failure.
    /// Publishes a local change. Returns whether a local record was replaced.
    ///
    /// # Errors
    /// - `InvalidInput` if the id belongs to a record of another kind
    /// - `NotFound` if the parent record does not exist
    async fn restore_record(
        &self,
        envelope: RecordEnvelope,
        assets: Vec<(String, Vec<u8>)>,
    ) -> Result<bool>;

    /// Delete a record and, transitively, everything it owns, including
    /// the binary assets of descendant images.
    ///
    /// # Errors
    /// - `NotFound` if no record of that kind has the id
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;

    /// Manifest of every record of a kind.
    async fn manifest(&self, kind: EntityKind) -> Result<Vec<ManifestEntry>>;

    /// Create an image together with its original and thumbnail assets.
    ///
    /// Assets are written first; on record-write failure they are removed.
    async fn create_image(
        &self,
        image: Image,
        original: Vec<u8>,
        thumbnail: Vec<u8>,
    ) -> Result<Image>;

    /// Number of records of a kind.
    async fn count(&self, kind: EntityKind) -> Result<usize> {
        Ok(self.list(kind).await?.len())
    }
}

/// Small persistent key/value area used for settings and bookkeeping.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    async fn put_value(&self, key: &str, value: &str) -> Result<()>;
}
