//! Sync scheduling - startup, periodic and change-driven passes.
//!
//! The scheduler owns nothing but its timers. Every trigger goes through
//! [`SyncTrigger`], which reports whether a pass is already in flight so
//! ticks never stack up behind one another.

use async_trait::async_trait;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use inkboard_storage::LocalChange;

use crate::settings::SyncSettings;

/// Something the scheduler can start passes on.
#[async_trait]
pub trait SyncTrigger: Send + Sync + 'static {
    /// Whether a pass is running or paused.
    fn is_syncing(&self) -> bool;

    /// Whether the paused pass has waited long enough that a new pass
    /// would replace it.
    fn has_expired_pause(&self) -> bool {
        false
    }

    /// Run one pass. Failures are the implementation's to log.
    async fn run_sync(&self);
}

/// Live scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSyncOptions {
    pub enabled: bool,
    pub interval: Duration,
    pub sync_on_startup: bool,
    pub connected: bool,
    /// Quiet period after the last local change before a pass starts.
    pub debounce: Duration,
}

impl AutoSyncOptions {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

    pub fn from_settings(settings: &SyncSettings, debounce: Duration) -> Self {
        Self {
            enabled: settings.auto_sync_enabled,
            interval: settings.sync_interval.as_duration(),
            sync_on_startup: settings.sync_on_startup,
            connected: settings.is_connected(),
            debounce,
        }
    }

    /// Timers only run while enabled and connected.
    pub fn is_active(&self) -> bool {
        self.enabled && self.connected
    }
}

/// Handle to a running scheduler. Dropping it stops the scheduler.
pub struct SchedulerHandle {
    options: watch::Sender<AutoSyncOptions>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Replace the options. Timers are re-armed from now.
    pub fn set_options(&self, options: AutoSyncOptions) {
        self.options.send_replace(options);
    }

    pub fn options(&self) -> AutoSyncOptions {
        self.options.borrow().clone()
    }

    /// Stop the scheduler. A pass already started is abandoned at its next await.
    pub fn shutdown(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Background task driving automatic sync passes.
pub struct SyncScheduler {
    trigger: Arc<dyn SyncTrigger>,
    options: watch::Receiver<AutoSyncOptions>,
    current: AutoSyncOptions,
    changes: Option<broadcast::Receiver<LocalChange>>,
    next_tick: Option<Instant>,
    pending_change: Option<Instant>,
    startup_due: bool,
}

impl SyncScheduler {
    /// Spawn the scheduler on the current runtime.
    pub fn spawn(
        trigger: Arc<dyn SyncTrigger>,
        options: AutoSyncOptions,
        changes: broadcast::Receiver<LocalChange>,
    ) -> SchedulerHandle {
        let (tx, rx) = watch::channel(options.clone());
        let scheduler = Self {
            trigger,
            options: rx,
            startup_due: options.is_active() && options.sync_on_startup,
            next_tick: options.is_active().then(|| Instant::now() + options.interval),
            current: options,
            changes: Some(changes),
            pending_change: None,
        };

        SchedulerHandle {
            options: tx,
            task: tokio::spawn(scheduler.run()),
        }
    }

    async fn run(mut self) {
        info!(
            "Auto-sync scheduler started (active: {}, every {:?})",
            self.current.is_active(),
            self.current.interval
        );

        loop {
            if self.startup_due {
                self.startup_due = false;
                self.fire("startup").await;
            }

            tokio::select! {
                changed = self.options.changed() => {
                    if changed.is_err() {
                        debug!("Scheduler handle gone");
                        break;
                    }
                    let next = self.options.borrow_and_update().clone();
                    self.apply_options(next);
                }

                _ = sleep_until_some(self.next_tick) => {
                    self.next_tick = Some(Instant::now() + self.current.interval);
                    self.fire("interval").await;
                }

                change = recv_change(&mut self.changes) => {
                    match change {
                        Ok(change) => debug!("Local change: {} {}", change.kind, change.id),
                        Err(RecvError::Lagged(missed)) => debug!("Missed {} local changes", missed),
                        Err(RecvError::Closed) => {
                            debug!("Change feed closed");
                            self.changes = None;
                            continue;
                        }
                    }
                    if self.current.is_active() {
                        self.pending_change = Some(Instant::now() + self.current.debounce);
                    }
                }

                _ = sleep_until_some(self.pending_change) => {
                    if self.is_blocked() {
                        // Changes made during a pass still need a pass of their own.
                        self.pending_change = Some(Instant::now() + self.current.debounce);
                    } else {
                        self.pending_change = None;
                        self.fire("local change").await;
                    }
                }
            }
        }
    }

    fn apply_options(&mut self, next: AutoSyncOptions) {
        let was_active = self.current.is_active();
        self.current = next;

        if self.current.is_active() {
            self.next_tick = Some(Instant::now() + self.current.interval);
            if !was_active && self.current.sync_on_startup {
                self.startup_due = true;
            }
            debug!("Auto-sync armed every {:?}", self.current.interval);
        } else {
            self.next_tick = None;
            self.pending_change = None;
            debug!("Auto-sync disarmed");
        }
    }

    /// A pass is running, or paused on conflicts that have not expired.
    fn is_blocked(&self) -> bool {
        self.trigger.is_syncing() && !self.trigger.has_expired_pause()
    }

    async fn fire(&self, reason: &str) {
        if self.is_blocked() {
            debug!("Skipping {} sync, pass in flight", reason);
            return;
        }
        debug!("Triggering {} sync", reason);
        self.trigger.run_sync().await;
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn recv_change(
    changes: &mut Option<broadcast::Receiver<LocalChange>>,
) -> Result<LocalChange, RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
