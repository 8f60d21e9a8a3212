//! Local change notifications.
//!
//! Mutation sites publish a [`LocalChange`] after every successful write;
//! the auto-sync scheduler subscribes and debounces them into sync passes.

use tokio::sync::broadcast;
use tracing::trace;

use inkboard_common::EntityKind;

/// Default channel capacity. Slow subscribers skip ahead instead of blocking writers.
const DEFAULT_CAPACITY: usize = 256;

/// A record changed in the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    pub kind: EntityKind,
    pub id: String,
}

/// Fan-out publisher of local changes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<LocalChange>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a change. Never blocks and never fails the caller.
    pub fn notify(&self, kind: EntityKind, id: impl Into<String>) {
        let change = LocalChange {
            kind,
            id: id.into(),
        };
        if self.tx.send(change).is_err() {
            trace!("No change subscribers");
        }
    }

    /// Subscribe to subsequent changes.
    pub fn subscribe(&self) -> broadcast::Receiver<LocalChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
