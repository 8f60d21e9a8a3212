//! Conflict detection and resolution.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use inkboard_common::{EntityKind, Error, RecordEnvelope, Result};

/// Conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Ask user to resolve manually.
    #[default]
    Ask,
    /// Prefer local version, overwrite remote.
    LocalWins,
    /// Prefer remote version, overwrite local.
    RemoteWins,
    /// The later modification wins; ties go to local.
    NewestWins,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::NewestWins => "newest_wins",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "ask" => Ok(Self::Ask),
            "local_wins" | "localwins" | "local" => Ok(Self::LocalWins),
            "remote_wins" | "remotewins" | "remote" => Ok(Self::RemoteWins),
            "newest_wins" | "newestwins" | "newest" => Ok(Self::NewestWins),
            _ => Err(Error::InvalidInput(format!("Unknown conflict strategy: {}", s))),
        }
    }
}

/// Decision for a single conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Push the local version over the remote one.
    KeepLocal,
    /// Replace the local version with the remote one.
    KeepRemote,
    /// Leave both untouched; the conflict comes back next pass.
    Skip,
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictVersion {
    pub snapshot: RecordEnvelope,
    pub modified_at: DateTime<Utc>,
    pub device_id: Option<String>,
}

impl ConflictVersion {
    pub fn new(snapshot: RecordEnvelope) -> Self {
        Self {
            modified_at: snapshot.record.updated_at(),
            device_id: snapshot.device_id.clone(),
            snapshot,
        }
    }
}

/// A record that changed on both sides with diverging content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub local: ConflictVersion,
    pub remote: ConflictVersion,
}

impl ConflictRecord {
    pub fn new(local: RecordEnvelope, remote: RecordEnvelope) -> Self {
        Self {
            entity_type: local.record.kind(),
            entity_id: local.record.id().to_string(),
            local: ConflictVersion::new(local),
            remote: ConflictVersion::new(remote),
        }
    }
}

/// Conflicts awaiting a decision, identified by a resumption token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictBatch {
    /// Token that `resolve_conflicts` and `cancel_conflicts` must present.
    pub id: String,
    pub conflicts: Vec<ConflictRecord>,
    pub created_at: DateTime<Utc>,
}

impl ConflictBatch {
    pub fn new(conflicts: Vec<ConflictRecord>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conflicts,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Whether the prompt has been left unanswered for longer than `timeout`.
    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > timeout
    }

    /// Check that `decisions` answers every conflict exactly once, in order.
    pub fn validate(&self, decisions: &[Resolution]) -> Result<()> {
        if decisions.len() != self.conflicts.len() {
            return Err(Error::InvalidInput(format!(
                "Expected {} decisions, got {}",
                self.conflicts.len(),
                decisions.len()
            )));
        }
        Ok(())
    }
}

/// Applies the configured strategy to detected conflicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Decide a conflict without user input. `None` means the user must decide.
    pub fn auto_resolve(&self, conflict: &ConflictRecord) -> Option<Resolution> {
        match self.strategy {
            ConflictStrategy::Ask => None,
            ConflictStrategy::LocalWins => Some(Resolution::KeepLocal),
            ConflictStrategy::RemoteWins => Some(Resolution::KeepRemote),
            ConflictStrategy::NewestWins => {
                if conflict.remote.modified_at > conflict.local.modified_at {
                    Some(Resolution::KeepRemote)
                } else {
                    Some(Resolution::KeepLocal)
                }
            }
        }
    }

    /// Decide every conflict, or `None` if any needs the user.
    pub fn resolve_all(&self, conflicts: &[ConflictRecord]) -> Option<Vec<Resolution>> {
        conflicts.iter().map(|c| self.auto_resolve(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_common::{Project, Record};

    fn conflict(local_at: DateTime<Utc>, remote_at: DateTime<Utc>) -> ConflictRecord {
        let mut local = Project::new("Local title");
        local.updated_at = local_at;
        let mut remote = local.clone();
        remote.name = "Remote title".into();
        remote.updated_at = remote_at;

        ConflictRecord::new(
            RecordEnvelope::new(Record::Project(local), Some("laptop".into())),
            RecordEnvelope::new(Record::Project(remote), Some("tablet".into())),
        )
    }

    #[test]
    fn test_ask_needs_user() {
        let resolver = ConflictResolver::new(ConflictStrategy::Ask);
        let now = Utc::now();

        assert_eq!(resolver.auto_resolve(&conflict(now, now)), None);
        assert_eq!(resolver.resolve_all(&[conflict(now, now)]), None);
        assert_eq!(resolver.resolve_all(&[]), Some(vec![]));
    }

    #[test]
    fn test_fixed_sides() {
        let now = Utc::now();
        let c = conflict(now, now + Duration::seconds(10));

        assert_eq!(
            ConflictResolver::new(ConflictStrategy::LocalWins).auto_resolve(&c),
            Some(Resolution::KeepLocal)
        );
        assert_eq!(
            ConflictResolver::new(ConflictStrategy::RemoteWins).auto_resolve(&c),
            Some(Resolution::KeepRemote)
        );
    }

    #[test]
    fn test_newest_wins() {
        let resolver = ConflictResolver::new(ConflictStrategy::NewestWins);
        let now = Utc::now();

        assert_eq!(
            resolver.auto_resolve(&conflict(now, now + Duration::seconds(1))),
            Some(Resolution::KeepRemote)
        );
        assert_eq!(
            resolver.auto_resolve(&conflict(now + Duration::seconds(1), now)),
            Some(Resolution::KeepLocal)
        );
    }

    #[test]
    fn test_newest_wins_tie_goes_to_local() {
        let resolver = ConflictResolver::new(ConflictStrategy::NewestWins);
        let now = Utc::now();

        assert_eq!(
            resolver.auto_resolve(&conflict(now, now)),
            Some(Resolution::KeepLocal)
        );
    }

    #[test]
    fn test_conflict_record_captures_both_sides() {
        let now = Utc::now();
        let c = conflict(now, now + Duration::seconds(3));

        assert_eq!(c.entity_type, EntityKind::Project);
        assert_eq!(c.local.device_id.as_deref(), Some("laptop"));
        assert_eq!(c.remote.device_id.as_deref(), Some("tablet"));
        assert_eq!(c.remote.modified_at, now + Duration::seconds(3));
    }

    #[test]
    fn test_batch_validation_and_expiry() {
        let now = Utc::now();
        let batch = ConflictBatch::new(vec![conflict(now, now), conflict(now, now)]);

        assert!(batch.validate(&[Resolution::Skip, Resolution::KeepLocal]).is_ok());
        assert!(batch.validate(&[Resolution::Skip]).is_err());

        let later = batch.created_at + Duration::minutes(11);
        assert!(batch.is_expired(Duration::minutes(10), later));
        assert!(!batch.is_expired(Duration::minutes(10), batch.created_at));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("ask".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Ask);
        assert_eq!(
            "local-wins".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::LocalWins
        );
        assert_eq!(
            "newestWins".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::NewestWins
        );
        assert!("merge".parse::<ConflictStrategy>().is_err());
    }
}
