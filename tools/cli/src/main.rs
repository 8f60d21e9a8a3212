//! Inkboard CLI - Command line interface for sync and backup.
//!
//! This tool drives the local dataset, its sync with a remote folder,
//! and whole-dataset backups.

mod config;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use inkboard_backup::Packager;
use inkboard_common::{EntityKind, Project, Record};
use inkboard_storage::{
    FileStorage, FolderRemote, LocalFileStorage, LocalRepository, LocalStore,
};
use inkboard_sync::{
    AutoSyncOptions, ConflictBatch, ConflictStrategy, Resolution, SettingsUpdate, SkipReason,
    SyncEngine, SyncInterval, SyncOptions, SyncOutcome, SyncScheduler, SyncSettings,
    SyncSettingsStore,
};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "inkboard")]
#[command(about = "Inkboard - Local-first sync and backup")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (default: platform data dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a remote folder.
    Connect {
        /// Remote folder to use from now on.
        #[arg(short, long)]
        remote: Option<PathBuf>,

        /// Set up the remote folder for this account if it is new.
        #[arg(long, value_name = "EMAIL")]
        init: Option<String>,
    },

    /// Forget the connected account.
    Disconnect,

    /// Show connection, settings and local counts.
    Status,

    /// Run a sync pass.
    Sync {
        /// Compare everything even if nothing seems to have changed.
        #[arg(short, long)]
        force: bool,

        /// Cancel instead of prompting when conflicts need a decision.
        #[arg(long)]
        cancel: bool,
    },

    /// Show or change sync settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Write a backup archive.
    Backup {
        /// Destination file.
        file: PathBuf,
    },

    /// Restore a backup archive.
    Restore {
        /// Archive to restore.
        file: PathBuf,
    },

    /// Keep syncing in the background until Ctrl-C.
    ///
    /// Only changes published inside this process trigger a pass after the
    /// debounce period. Edits and restores made by other `inkboard`
    /// invocations are picked up at the next interval tick.
    Watch,

    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        auto_sync: Option<bool>,

        /// Minutes between passes: 5, 15, 30 or 60.
        #[arg(long)]
        interval: Option<u32>,

        #[arg(long)]
        on_startup: Option<bool>,

        /// ask, local-wins, remote-wins or newest-wins.
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Restore defaults, keeping the connection.
    Reset,
}

#[derive(Subcommand)]
enum ProjectAction {
    Add {
        name: String,
    },
    List,
    /// Delete a project and everything in it.
    Rm {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "inkboard", &mut io::stdout());
        return Ok(());
    }

    let data_dir = cli.data_dir.unwrap_or_else(AppConfig::default_data_dir);
    let app = App::open(&data_dir).await?;

    match cli.command {
        Commands::Connect { remote, init } => cmd_connect(app, remote, init).await,
        Commands::Disconnect => cmd_disconnect(&app).await,
        Commands::Status => cmd_status(&app).await,
        Commands::Sync { force, cancel } => cmd_sync(&app, force, cancel).await,
        Commands::Settings { action } => cmd_settings(&app, action).await,
        Commands::Project { action } => cmd_project(&app, action).await,
        Commands::Backup { file } => cmd_backup(&app, &file).await,
        Commands::Restore { file } => cmd_restore(&app, &file).await,
        Commands::Watch => cmd_watch(&app).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Everything opened from the data directory.
struct App {
    data_dir: PathBuf,
    config: AppConfig,
    store: Arc<LocalStore>,
    files: Arc<LocalFileStorage>,
    settings: Arc<SyncSettingsStore>,
}

impl App {
    async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        info!("Data directory: {}", data_dir.display());

        let config = AppConfig::load(data_dir)?;
        let files = Arc::new(
            LocalFileStorage::new(data_dir.join("assets")).context("Failed to open asset storage")?,
        );
        let store = Arc::new(
            LocalStore::open(data_dir.join("inkboard.db"), files.clone())
                .context("Failed to open local database")?,
        );
        let settings = Arc::new(
            SyncSettingsStore::load(store.clone())
                .await
                .context("Failed to load sync settings")?,
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            store,
            files,
            settings,
        })
    }

    fn engine(&self) -> Result<SyncEngine> {
        let Some(remote) = &self.config.remote_folder else {
            bail!("No remote folder configured. Run `inkboard connect --remote <dir>` first");
        };

        Ok(SyncEngine::new(
            self.store.clone(),
            self.files.clone(),
            Arc::new(FolderRemote::new(remote)),
            self.settings.clone(),
            self.config.sync_config(),
        ))
    }
}

async fn cmd_connect(mut app: App, remote: Option<PathBuf>, init: Option<String>) -> Result<()> {
    if let Some(remote) = remote {
        app.config.remote_folder = Some(remote);
        app.config.save(&app.data_dir)?;
    }

    if let Some(email) = init {
        let Some(root) = &app.config.remote_folder else {
            bail!("--init needs a remote folder");
        };
        FolderRemote::initialize(root, &email)
            .await
            .context("Failed to set up remote folder")?;
        println!("Remote folder set up for {}", email);
    }

    let engine = app.engine()?;
    let account = engine.connect().await.context("Failed to connect")?;

    println!("Connected as {}", account.email);
    Ok(())
}

async fn cmd_disconnect(app: &App) -> Result<()> {
    match app.engine() {
        Ok(engine) => engine.disconnect().await?,
        Err(_) => {
            app.settings.set_connection(None).await?;
        }
    }

    println!("Disconnected.");
    Ok(())
}

fn print_settings(settings: &SyncSettings) {
    println!("  Auto-sync: {}", if settings.auto_sync_enabled { "on" } else { "off" });
    println!("  Interval: {}", settings.sync_interval);
    println!("  Sync on startup: {}", if settings.sync_on_startup { "yes" } else { "no" });
    println!("  Conflict strategy: {}", settings.conflict_strategy);
}

async fn cmd_status(app: &App) -> Result<()> {
    let settings = app.settings.get();

    println!("Inkboard Status:");
    println!("  Device: {}", app.config.device_label.as_deref().unwrap_or(app.store.device_id()));
    match &settings.connected_account_email {
        Some(email) => println!("  Account: {}", email),
        None => println!("  Account: not connected"),
    }
    match &app.config.remote_folder {
        Some(remote) => println!("  Remote folder: {}", remote.display()),
        None => println!("  Remote folder: not configured"),
    }
    match settings.last_sync_at {
        Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync: never"),
    }
    let held = app.settings.watermarks().len();
    if held > 0 {
        println!("  Skipped conflicts: {}", held);
    }
    print_settings(&settings);

    println!("  Records:");
    for kind in EntityKind::ALL {
        println!("    {}: {}", kind, app.store.count(kind).await?);
    }
    println!("  Assets: {}", app.files.list().await?.len());

    Ok(())
}

fn prompt_decisions(batch: &ConflictBatch) -> Result<Vec<Resolution>> {
    println!("{} conflicts need a decision:", batch.len());

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut decisions = Vec::with_capacity(batch.len());

    for (i, conflict) in batch.conflicts.iter().enumerate() {
        println!(
            "[{}/{}] {} {}",
            i + 1,
            batch.len(),
            conflict.entity_type,
            conflict.entity_id
        );
        println!(
            "  local:  modified {} on {}",
            conflict.local.modified_at,
            conflict.local.device_id.as_deref().unwrap_or("unknown device")
        );
        println!(
            "  remote: modified {} on {}",
            conflict.remote.modified_at,
            conflict.remote.device_id.as_deref().unwrap_or("unknown device")
        );

        let decision = loop {
            print!("  Keep (l)ocal, (r)emote or (s)kip? ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else {
                bail!("Input closed before all conflicts were decided");
            };
            match line?.trim().to_ascii_lowercase().as_str() {
                "l" | "local" => break Resolution::KeepLocal,
                "r" | "remote" => break Resolution::KeepRemote,
                "s" | "skip" => break Resolution::Skip,
                other => println!("  Unknown answer {:?}", other),
            }
        };
        decisions.push(decision);
    }

    Ok(decisions)
}

async fn cmd_sync(app: &App, force: bool, cancel: bool) -> Result<()> {
    let engine = app.engine()?;
    let mut outcome = engine.sync(SyncOptions { force }).await?;

    while let SyncOutcome::AwaitingResolution(batch) = outcome {
        outcome = if cancel {
            engine.cancel_conflicts(&batch.id).await?
        } else {
            let decisions = prompt_decisions(&batch)?;
            engine.resolve_conflicts(&batch.id, decisions).await?
        };
    }

    match outcome {
        SyncOutcome::Completed(report) => {
            println!("Sync complete in {:.1}s", report.duration.as_secs_f64());
            println!("  Uploaded: {} records, {} assets", report.uploaded, report.assets_uploaded);
            println!(
                "  Downloaded: {} records, {} assets",
                report.downloaded, report.assets_downloaded
            );
            if report.conflicts_resolved + report.conflicts_skipped > 0 {
                println!(
                    "  Conflicts: {} resolved, {} skipped",
                    report.conflicts_resolved, report.conflicts_skipped
                );
            }
            Ok(())
        }
        SyncOutcome::Skipped(SkipReason::NotConnected) => {
            bail!("Not connected. Run `inkboard connect` first")
        }
        SyncOutcome::Skipped(SkipReason::NothingChanged) => {
            println!("Nothing changed since the last sync.");
            Ok(())
        }
        SyncOutcome::Cancelled => {
            println!("Sync cancelled; nothing was transferred.");
            Ok(())
        }
        SyncOutcome::Failed(failure) => {
            bail!("{} ({})", failure.user_message, failure.message)
        }
        SyncOutcome::AwaitingResolution(_) => Ok(()),
    }
}

async fn cmd_settings(app: &App, action: SettingsAction) -> Result<()> {
    let settings = match action {
        SettingsAction::Show => app.settings.get(),
        SettingsAction::Set {
            auto_sync,
            interval,
            on_startup,
            strategy,
        } => {
            let update = SettingsUpdate {
                auto_sync_enabled: auto_sync,
                sync_interval: interval.map(SyncInterval::try_from).transpose()?,
                sync_on_startup: on_startup,
                conflict_strategy: strategy
                    .as_deref()
                    .map(str::parse::<ConflictStrategy>)
                    .transpose()?,
            };
            if update.is_empty() {
                bail!("Nothing to change. See `inkboard settings set --help`");
            }
            app.settings.update(update).await?
        }
        SettingsAction::Reset => app.settings.reset().await?,
    };

    println!("Sync settings:");
    print_settings(&settings);
    Ok(())
}

async fn cmd_project(app: &App, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::Add { name } => {
            let record = app.store.create(Record::Project(Project::new(name))).await?;
            println!("Project created: {}", record.id());
        }
        ProjectAction::List => {
            let projects = app.store.list(EntityKind::Project).await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for envelope in projects {
                if let Record::Project(project) = envelope.record {
                    println!(
                        "  {}  {}  (updated {})",
                        project.id,
                        project.name,
                        project.updated_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        ProjectAction::Rm { id } => {
            app.store
                .delete(EntityKind::Project, &id)
                .await
                .context("Failed to delete project")?;
            println!("Project removed: {}", id);
        }
    }
    Ok(())
}

async fn cmd_backup(app: &App, file: &Path) -> Result<()> {
    let packager = Packager::new(app.store.clone(), app.files.clone());
    let report = packager.backup(file).await.context("Backup failed")?;

    println!("Backup written to {}", report.path.display());
    println!(
        "  {} records, {} assets, {} bytes",
        report.record_count(),
        report.asset_count,
        report.size
    );
    Ok(())
}

async fn cmd_restore(app: &App, file: &Path) -> Result<()> {
    let packager = Packager::new(app.store.clone(), app.files.clone());
    let report = packager.restore(file).await.context("Restore failed")?;

    println!("Restored backup from {}", report.exported_at.format("%Y-%m-%d %H:%M:%S UTC"));
    for (kind, count) in &report.imported {
        println!("  {}: {}", kind, count);
    }
    println!("  Assets: {}", report.assets);
    if report.replaced > 0 {
        println!("  Replaced {} existing records", report.replaced);
    }
    Ok(())
}

async fn cmd_watch(app: &App) -> Result<()> {
    let engine = Arc::new(app.engine()?);
    let debounce = app.config.debounce();
    let mut settings_rx = app.settings.subscribe();

    let scheduler = SyncScheduler::spawn(
        engine.clone(),
        AutoSyncOptions::from_settings(&settings_rx.borrow_and_update(), debounce),
        app.store.changes().subscribe(),
    );
    println!("Watching for changes. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            changed = settings_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let settings = settings_rx.borrow_and_update().clone();
                scheduler.set_options(AutoSyncOptions::from_settings(&settings, debounce));
            }
        }
    }

    scheduler.shutdown();
    info!("Auto-sync stopped");
    Ok(())
}
