//! HealthSync CLI - Command line interface for health data exports.
//!
//! This tool exports health data files to Google Drive, keeps the offline
//! export queue, and can run as a foreground daemon that drains the queue
//! when connectivity returns.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use healthsync_common::{DataTag, HealthData};
use healthsync_storage::gdrive::{
    GoogleAdapters, RefreshingTokenSource, StaticTokenSource, TokenSource, Tokens,
};
use healthsync_storage::{FileKeyValueStore, KeyValueStore};
use healthsync_sync::{
    default_config_path, probe_connectivity, resolve_background_fetch_interval_minutes,
    spawn_probe_loop, spawn_recovery_trigger, AppContext, BackgroundScheduler, CompletionNotifier,
    ExportDisposition, ExportOutcome, HealthDataSource, InProcessTaskRegistry, NetworkMonitor,
    NewPendingExport, Platform, QueueStore, RegistrationChange, RunSummary, SyncConfig,
    SyncMetadata,
};

#[derive(Parser)]
#[command(name = "healthsync")]
#[command(about = "HealthSync - Offline-durable health data export")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: platform config dir).
    #[arg(short, long, env = "HEALTHSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the queue and settings documents.
    #[arg(long, env = "HEALTHSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Host platform, overriding the config file.
    #[arg(long, env = "HEALTHSYNC_PLATFORM")]
    platform: Option<Platform>,

    /// Google access token, used instead of the configured token file.
    #[arg(long, env = "HEALTHSYNC_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or clear the offline export queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Queue an export of a health data file without trying it now.
    Enqueue {
        /// JSON file with the health data.
        #[arg(short, long)]
        input: PathBuf,

        /// Series to export, comma separated (default: configured series).
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<DataTag>,

        /// Only export these dates (YYYY-MM-DD), comma separated.
        #[arg(short, long, value_delimiter = ',')]
        dates: Vec<String>,
    },

    /// Export a health data file now, queueing it if that is not possible.
    Export {
        /// JSON file with the health data.
        #[arg(short, long)]
        input: PathBuf,

        /// Series to export, comma separated (default: configured series).
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<DataTag>,

        /// Only export these dates (YYYY-MM-DD), comma separated.
        #[arg(short, long, value_delimiter = ',')]
        dates: Vec<String>,
    },

    /// Process the export queue once.
    Process,

    /// Show the background interval a platform registers.
    Interval {
        /// Platform: "ios", "android", or "desktop".
        #[arg(short, long)]
        platform: Platform,

        /// Requested interval in minutes.
        #[arg(short, long)]
        minutes: u32,
    },

    /// Show queue, sync, and connectivity status.
    Status,

    /// Set the language used for completion notices.
    Language {
        /// Language code, e.g. "en" or "de".
        code: String,
    },

    /// Run in the foreground: watch connectivity and export on schedule.
    Daemon {
        /// JSON file re-exported whenever it changes.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending exports.
    List,
    /// Print the number of pending exports.
    Count,
    /// Drop every pending export.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // RUST_LOG narrows or widens individual targets on top of the base level
    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::from_level(level).into());
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&cli).await?;

    match &cli.command {
        Commands::Queue { action } => cmd_queue(&config, action).await,

        Commands::Enqueue {
            input,
            tags,
            dates,
        } => cmd_enqueue(&config, input, tags, dates).await,

        Commands::Export {
            input,
            tags,
            dates,
        } => cmd_export(&cli, &config, input, tags, dates).await,

        Commands::Process => cmd_process(&cli, &config).await,

        Commands::Interval { platform, minutes } => {
            cmd_interval(*platform, *minutes);
            Ok(())
        }

        Commands::Status => cmd_status(&config).await,

        Commands::Language { code } => cmd_language(&config, code).await,

        Commands::Daemon { input } => cmd_daemon(&cli, &config, input.as_deref()).await,
    }
}

/// Load the configuration file and apply command line overrides.
async fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = SyncConfig::load(&path)
        .await
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(platform) = cli.platform {
        config.platform = platform;
    }
    Ok(config)
}

/// Open the local document store.
fn open_store(config: &SyncConfig) -> Result<Arc<dyn KeyValueStore>> {
    let dir = config.data_dir();
    let store = FileKeyValueStore::new(&dir)
        .with_context(|| format!("Failed to open data directory {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// Read a health data file.
async fn read_health_data(path: &Path) -> Result<HealthData> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context("Invalid health data file")
}

/// Build a queue entry from command line arguments.
fn pending_export(
    config: &SyncConfig,
    health_data: HealthData,
    tags: &[DataTag],
    dates: &[String],
) -> NewPendingExport {
    let selected_tags = if tags.is_empty() {
        config.selected_tags.clone()
    } else {
        tags.iter().copied().collect()
    };
    let sync_date_range = if dates.is_empty() {
        None
    } else {
        Some(dates.iter().cloned().collect::<BTreeSet<String>>())
    };

    NewPendingExport {
        health_data,
        selected_tags,
        sync_date_range,
    }
}

/// Everything an online command needs, plus the token state to persist.
struct Session {
    ctx: AppContext,
    monitor: Arc<NetworkMonitor>,
    refreshing: Option<(Arc<RefreshingTokenSource>, PathBuf)>,
}

impl Session {
    async fn open(cli: &Cli, config: &SyncConfig) -> Result<Self> {
        let kv = open_store(config)?;

        let mut refreshing = None;
        let tokens: Arc<dyn TokenSource> = if let Some(token) = &cli.access_token {
            Arc::new(StaticTokenSource::new(token.clone()))
        } else if let Some(token_file) = &config.google.token_file {
            let content = tokio::fs::read_to_string(token_file)
                .await
                .with_context(|| format!("Failed to read token file {}", token_file.display()))?;
            let stored: Tokens =
                serde_json::from_str(&content).context("Invalid token file")?;

            match &config.google.oauth_client {
                Some(client) => {
                    let source = Arc::new(RefreshingTokenSource::new(
                        reqwest::Client::new(),
                        client.clone(),
                        stored,
                    ));
                    refreshing = Some((source.clone(), token_file.clone()));
                    source
                }
                None => Arc::new(StaticTokenSource::new(stored.access_token)),
            }
        } else {
            anyhow::bail!(
                "No Google credentials. Pass --access-token or set google.tokenFile in the config"
            );
        };

        let adapters = GoogleAdapters::new(tokens, config.google.endpoints.clone())
            .context("Failed to create Google adapters")?;

        let timeout = Duration::from_secs(config.network.probe_timeout_secs);
        let status = probe_connectivity(&config.network.probe_address, timeout).await;
        info!("Network is {}", status);
        let monitor = Arc::new(NetworkMonitor::new(status));

        let ctx = AppContext::new(config.clone(), kv, Arc::new(adapters), monitor.clone());

        Ok(Self {
            ctx,
            monitor,
            refreshing,
        })
    }

    /// Write refreshed tokens back to the token file.
    async fn close(self) -> Result<()> {
        if let Some((source, path)) = self.refreshing {
            let tokens = source.tokens().await;
            tokio::fs::write(&path, serde_json::to_string_pretty(&tokens)?)
                .await
                .with_context(|| format!("Failed to save tokens to {}", path.display()))?;
        }
        Ok(())
    }
}

fn print_outcome(outcome: &ExportOutcome) {
    println!("Queue processed:");
    println!("  Exported: {}", outcome.success_count);
    println!("  Failed: {}", outcome.fail_count);
    println!("  Evicted: {}", outcome.skipped_count);
    for error in &outcome.errors {
        println!("  - {}", error);
    }
}

/// Inspect or clear the queue.
async fn cmd_queue(config: &SyncConfig, action: &QueueAction) -> Result<()> {
    let queue = QueueStore::new(open_store(config)?);

    match action {
        QueueAction::List => {
            let pending = queue.list().await.context("Failed to read queue")?;
            if pending.is_empty() {
                println!("Queue is empty.");
            } else {
                println!("Pending exports:");
                for job in pending {
                    let tags: Vec<String> =
                        job.selected_tags.iter().map(|t| t.to_string()).collect();
                    println!(
                        "  {} created {} ({} records; {}; retries {})",
                        job.id,
                        job.created_at.to_rfc3339(),
                        job.health_data.record_count(),
                        tags.join(","),
                        job.retry_count
                    );
                    if let Some(error) = &job.last_error {
                        println!("      last error: {}", error);
                    }
                }
            }
        }
        QueueAction::Count => {
            println!("{}", queue.count().await.context("Failed to read queue")?);
        }
        QueueAction::Clear => {
            let count = queue.count().await.context("Failed to read queue")?;
            queue.clear().await.context("Failed to clear queue")?;
            println!("Removed {} pending export(s).", count);
        }
    }

    Ok(())
}

/// Add an export to the queue.
async fn cmd_enqueue(
    config: &SyncConfig,
    input: &Path,
    tags: &[DataTag],
    dates: &[String],
) -> Result<()> {
    info!("Queueing export of {}", input.display());

    let health_data = read_health_data(input).await?;
    let queue = QueueStore::new(open_store(config)?);
    let id = queue
        .add(pending_export(config, health_data, tags, dates))
        .await
        .context("Failed to queue export")?;

    println!("Export queued: {}", id);
    Ok(())
}

/// Export now, or queue when offline.
async fn cmd_export(
    cli: &Cli,
    config: &SyncConfig,
    input: &Path,
    tags: &[DataTag],
    dates: &[String],
) -> Result<()> {
    info!("Exporting {}", input.display());

    let health_data = read_health_data(input).await?;
    let session = Session::open(cli, config).await?;

    let disposition = session
        .ctx
        .service
        .export_now(pending_export(config, health_data, tags, dates))
        .await;
    session.close().await?;

    match disposition.context("Export failed")? {
        ExportDisposition::Exported(report) => {
            println!("Export complete: {} records", report.records);
            for doc in &report.documents {
                println!(
                    "  [{}] {} ({:?}, {} rows)",
                    doc.format, doc.name, doc.action, doc.rows
                );
            }
            for pdf in &report.pdfs {
                println!("  [PDF] {}", pdf.name);
            }
        }
        ExportDisposition::Queued { id, reason } => {
            println!("Export queued ({}): {}", reason, id);
        }
    }

    Ok(())
}

/// Drain the queue once.
async fn cmd_process(cli: &Cli, config: &SyncConfig) -> Result<()> {
    let session = Session::open(cli, config).await?;
    let outcome = session.ctx.processor.process_queue().await;
    session.close().await?;

    if outcome.is_idle() {
        println!("Nothing processed (offline, busy, or queue empty).");
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

/// Show the effective background interval.
fn cmd_interval(platform: Platform, minutes: u32) {
    let effective = resolve_background_fetch_interval_minutes(platform, minutes);
    println!("{}: {} minutes", platform, effective);
}

/// Show status.
async fn cmd_status(config: &SyncConfig) -> Result<()> {
    let kv = open_store(config)?;
    let queue = QueueStore::new(kv.clone());
    let metadata = SyncMetadata::new(kv);

    let timeout = Duration::from_secs(config.network.probe_timeout_secs);
    let network = probe_connectivity(&config.network.probe_address, timeout).await;
    let last_sync = metadata.last_sync().await.context("Failed to read last sync")?;
    let language = metadata.language().await.context("Failed to read language")?;

    println!("HealthSync Status:");
    println!("  Data dir: {}", config.data_dir().display());
    println!("  Network: {}", network);
    println!("  Pending exports: {}", queue.count().await?);
    println!(
        "  Last sync: {}",
        last_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Language: {}", language.as_deref().unwrap_or("default"));
    println!("  Platform: {}", config.platform);
    println!(
        "  Background: {} (every {} minutes)",
        if config.background.enabled {
            "enabled"
        } else {
            "disabled"
        },
        resolve_background_fetch_interval_minutes(
            config.platform,
            config.background.interval_minutes
        )
    );

    Ok(())
}

/// Store the language preference.
async fn cmd_language(config: &SyncConfig, code: &str) -> Result<()> {
    let metadata = SyncMetadata::new(open_store(config)?);
    metadata
        .set_language(code)
        .await
        .context("Failed to save language")?;
    println!("Language set to {}", code);
    Ok(())
}

/// Health data file, offered again once it is newer than the last sync.
struct FileDataSource {
    path: PathBuf,
}

#[async_trait]
impl HealthDataSource for FileDataSource {
    async fn fetch_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> healthsync_common::Result<HealthData> {
        let modified: DateTime<Utc> = tokio::fs::metadata(&self.path).await?.modified()?.into();
        if since.is_some_and(|since| modified <= since) {
            return Ok(HealthData::default());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content)
            .map_err(|e| healthsync_common::Error::Serialization(e.to_string()))
    }
}

/// Reports delivered background runs in the log.
struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, language: Option<&str>, summary: &RunSummary) {
        info!(
            language = language.unwrap_or("default"),
            queued = summary.queue.success_count,
            records = summary.exported_records,
            "Background export delivered"
        );
    }
}

/// Foreground daemon.
async fn cmd_daemon(cli: &Cli, config: &SyncConfig, input: Option<&Path>) -> Result<()> {
    let session = Session::open(cli, config).await?;
    let ctx = session.ctx.clone();

    let probe = spawn_probe_loop(
        session.monitor.clone(),
        config.network.probe_address.clone(),
        Duration::from_secs(config.network.probe_timeout_secs),
        Duration::from_secs(config.network.probe_interval_secs.max(1)),
    );
    let recovery = spawn_recovery_trigger(ctx.processor.clone(), session.monitor.clone());

    let mut runner = ctx.background_runner().with_notifier(Arc::new(LogNotifier));
    if let Some(path) = input {
        runner = runner.with_source(Arc::new(FileDataSource {
            path: path.to_path_buf(),
        }));
    }

    let registry = Arc::new(InProcessTaskRegistry::new(Arc::new(runner)));
    let scheduler = BackgroundScheduler::new(registry, config.platform);

    let mut background = config.background.clone();
    background.enabled = true;
    match scheduler
        .apply(&background)
        .await
        .context("Failed to schedule background exports")?
    {
        RegistrationChange::Unavailable(status) => {
            warn!("Background execution unavailable: {:?}", status);
        }
        change => info!("Background task {:?}", change),
    }

    let outcome = ctx.processor.process_queue().await;
    if !outcome.is_idle() {
        print_outcome(&outcome);
    }

    println!("HealthSync daemon running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    background.enabled = false;
    scheduler.apply(&background).await?;
    probe.abort();
    recovery.abort();
    session.close().await?;

    println!("Stopped.");
    Ok(())
}
