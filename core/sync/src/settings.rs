//! Persisted sync settings and per-id watermarks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use inkboard_common::{Collection, Error, Result};
use inkboard_storage::KeyValueStore;

use crate::conflict::ConflictStrategy;

/// Key the settings document is stored under.
pub const SETTINGS_KEY: &str = "sync_settings";

/// Allowed auto-sync intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SyncInterval {
    Five,
    #[default]
    Fifteen,
    Thirty,
    Sixty,
}

impl SyncInterval {
    pub fn minutes(&self) -> u32 {
        match self {
            Self::Five => 5,
            Self::Fifteen => 15,
            Self::Thirty => 30,
            Self::Sixty => 60,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.minutes()) * 60)
    }
}

impl TryFrom<u32> for SyncInterval {
    type Error = Error;

    fn try_from(minutes: u32) -> Result<Self> {
        match minutes {
            5 => Ok(Self::Five),
            15 => Ok(Self::Fifteen),
            30 => Ok(Self::Thirty),
            60 => Ok(Self::Sixty),
            other => Err(Error::InvalidInput(format!(
                "Sync interval must be 5, 15, 30 or 60 minutes, got {}",
                other
            ))),
        }
    }
}

impl From<SyncInterval> for u32 {
    fn from(interval: SyncInterval) -> u32 {
        interval.minutes()
    }
}

impl fmt::Display for SyncInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} min", self.minutes())
    }
}

/// User-facing sync configuration and connection status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub auto_sync_enabled: bool,
    pub sync_interval: SyncInterval,
    pub sync_on_startup: bool,
    pub conflict_strategy: ConflictStrategy,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub connected_account_email: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            sync_interval: SyncInterval::Fifteen,
            sync_on_startup: true,
            conflict_strategy: ConflictStrategy::Ask,
            last_sync_at: None,
            connected_account_email: None,
        }
    }
}

impl SyncSettings {
    pub fn is_connected(&self) -> bool {
        self.connected_account_email.is_some()
    }
}

/// Partial update of the user-editable settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub auto_sync_enabled: Option<bool>,
    pub sync_interval: Option<SyncInterval>,
    pub sync_on_startup: Option<bool>,
    pub conflict_strategy: Option<ConflictStrategy>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&self, settings: &mut SyncSettings) {
        if let Some(enabled) = self.auto_sync_enabled {
            settings.auto_sync_enabled = enabled;
        }
        if let Some(interval) = self.sync_interval {
            settings.sync_interval = interval;
        }
        if let Some(on_startup) = self.sync_on_startup {
            settings.sync_on_startup = on_startup;
        }
        if let Some(strategy) = self.conflict_strategy {
            settings.conflict_strategy = strategy;
        }
    }
}

/// Per-id watermarks held back by skipped conflicts.
///
/// A held id keeps being compared against the watermark it had when it was
/// skipped, even after the global `last_sync_at` moves on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    held: BTreeMap<String, BTreeMap<String, DateTime<Utc>>>,
}

impl Watermarks {
    pub fn get(&self, collection: Collection, id: &str) -> Option<DateTime<Utc>> {
        self.held
            .get(collection.as_str())
            .and_then(|ids| ids.get(id))
            .copied()
    }

    pub fn hold(&mut self, collection: Collection, id: impl Into<String>, at: DateTime<Utc>) {
        self.held
            .entry(collection.as_str().to_string())
            .or_default()
            .insert(id.into(), at);
    }

    pub fn release(&mut self, collection: Collection, id: &str) {
        if let Some(ids) = self.held.get_mut(collection.as_str()) {
            ids.remove(id);
            if ids.is_empty() {
                self.held.remove(collection.as_str());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.held.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[derive(Serialize, Deserialize, Default)]
struct Persisted {
    #[serde(default)]
    settings: SyncSettings,
    #[serde(default)]
    watermarks: Watermarks,
}

/// Owner of the [`SyncSettings`] singleton.
///
/// Every change is persisted before it is published to subscribers.
pub struct SyncSettingsStore {
    kv: Arc<dyn KeyValueStore>,
    tx: watch::Sender<SyncSettings>,
    watermarks: Mutex<Watermarks>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SyncSettingsStore {
    /// Load settings, creating defaults on first launch.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let persisted = match kv.get_value(SETTINGS_KEY).await? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!("Stored sync settings unreadable, using defaults: {}", e);
                Persisted::default()
            }),
            None => {
                info!("No sync settings found, creating defaults");
                let defaults = Persisted::default();
                kv.put_value(SETTINGS_KEY, &encode(&defaults)?).await?;
                defaults
            }
        };

        let (tx, _) = watch::channel(persisted.settings);
        Ok(Self {
            kv,
            tx,
            watermarks: Mutex::new(persisted.watermarks),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Current settings.
    pub fn get(&self) -> SyncSettings {
        self.tx.borrow().clone()
    }

    /// Observe settings changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncSettings> {
        self.tx.subscribe()
    }

    /// Current per-id watermarks.
    pub fn watermarks(&self) -> Watermarks {
        self.watermarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a user edit.
    pub async fn update(&self, update: SettingsUpdate) -> Result<SyncSettings> {
        self.modify(|settings, _| update.apply(settings)).await
    }

    /// Restore default preferences. Connection status and sync history survive.
    pub async fn reset(&self) -> Result<SyncSettings> {
        self.modify(|settings, _| {
            *settings = SyncSettings {
                last_sync_at: settings.last_sync_at,
                connected_account_email: settings.connected_account_email.take(),
                ..SyncSettings::default()
            };
        })
        .await
    }

    /// Record the connected account, or clear it with `None`.
    pub async fn set_connection(&self, email: Option<String>) -> Result<SyncSettings> {
        self.modify(|settings, _| settings.connected_account_email = email)
            .await
    }

    /// Advance the global watermark and replace the held watermarks together.
    pub async fn record_pass(
        &self,
        started_at: DateTime<Utc>,
        watermarks: Watermarks,
    ) -> Result<SyncSettings> {
        self.modify(|settings, held| {
            settings.last_sync_at = Some(started_at);
            *held = watermarks;
        })
        .await
    }

    async fn modify<F>(&self, f: F) -> Result<SyncSettings>
    where
        F: FnOnce(&mut SyncSettings, &mut Watermarks),
    {
        let _guard = self.write_lock.lock().await;

        let mut persisted = Persisted {
            settings: self.get(),
            watermarks: self.watermarks(),
        };
        f(&mut persisted.settings, &mut persisted.watermarks);

        self.kv.put_value(SETTINGS_KEY, &encode(&persisted)?).await?;
        debug!("Sync settings saved");

        *self
            .watermarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = persisted.watermarks;
        self.tx.send_replace(persisted.settings.clone());
        Ok(persisted.settings)
    }
}

fn encode(persisted: &Persisted) -> Result<String> {
    serde_json::to_string(persisted).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_common::EntityKind;
    use inkboard_storage::{LocalStore, MemoryFileStorage};

    async fn kv() -> Arc<dyn KeyValueStore> {
        Arc::new(LocalStore::in_memory(Arc::new(MemoryFileStorage::new())).unwrap())
    }

    #[tokio::test]
    async fn test_defaults_on_first_launch() {
        let kv = kv().await;
        let store = SyncSettingsStore::load(kv.clone()).await.unwrap();

        let settings = store.get();
        assert!(settings.auto_sync_enabled);
        assert_eq!(settings.sync_interval, SyncInterval::Fifteen);
        assert!(settings.sync_on_startup);
        assert_eq!(settings.conflict_strategy, ConflictStrategy::Ask);
        assert!(settings.last_sync_at.is_none());
        assert!(!settings.is_connected());
        assert!(kv.get_value(SETTINGS_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_persists_and_publishes() {
        let kv = kv().await;
        let store = SyncSettingsStore::load(kv.clone()).await.unwrap();
        let mut rx = store.subscribe();

        store
            .update(SettingsUpdate {
                sync_interval: Some(SyncInterval::Five),
                conflict_strategy: Some(ConflictStrategy::NewestWins),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().sync_interval, SyncInterval::Five);

        let reloaded = SyncSettingsStore::load(kv).await.unwrap();
        assert_eq!(reloaded.get().conflict_strategy, ConflictStrategy::NewestWins);
        assert!(reloaded.get().auto_sync_enabled);
    }

    #[tokio::test]
    async fn test_reset_keeps_connection_and_history() {
        let store = SyncSettingsStore::load(kv().await).await.unwrap();
        let synced_at = Utc::now();

        store.set_connection(Some("me@example.com".into())).await.unwrap();
        store.record_pass(synced_at, Watermarks::default()).await.unwrap();
        store
            .update(SettingsUpdate {
                auto_sync_enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();

        let settings = store.reset().await.unwrap();
        assert!(settings.auto_sync_enabled);
        assert_eq!(settings.connected_account_email.as_deref(), Some("me@example.com"));
        assert_eq!(settings.last_sync_at, Some(synced_at));
    }

    #[tokio::test]
    async fn test_watermarks_round_trip() {
        let kv = kv().await;
        let store = SyncSettingsStore::load(kv.clone()).await.unwrap();
        let collection = Collection::Records(EntityKind::Page);
        let at = Utc::now();

        let mut held = Watermarks::default();
        held.hold(collection, "page-1", at);
        store.record_pass(Utc::now(), held).await.unwrap();

        let reloaded = SyncSettingsStore::load(kv).await.unwrap();
        let watermarks = reloaded.watermarks();
        assert_eq!(watermarks.get(collection, "page-1"), Some(at));
        assert_eq!(watermarks.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_settings_fall_back_to_defaults() {
        let kv = kv().await;
        kv.put_value(SETTINGS_KEY, "{ definitely not json").await.unwrap();

        let store = SyncSettingsStore::load(kv).await.unwrap();
        assert_eq!(store.get(), SyncSettings::default());
    }

    #[test]
    fn test_interval_accepts_only_known_values() {
        assert_eq!(SyncInterval::try_from(30).unwrap(), SyncInterval::Thirty);
        assert!(SyncInterval::try_from(10).is_err());
        assert!(serde_json::from_str::<SyncInterval>("7").is_err());
        assert_eq!(serde_json::to_string(&SyncInterval::Sixty).unwrap(), "60");
        assert_eq!(SyncInterval::Five.as_duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_watermark_release() {
        let collection = Collection::Assets;
        let mut held = Watermarks::default();
        held.hold(collection, "a", Utc::now());
        held.release(collection, "a");

        assert!(held.is_empty());
        assert_eq!(held.get(collection, "a"), None);
    }
}
