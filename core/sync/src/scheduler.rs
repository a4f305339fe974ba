//! Background scheduling: when the queue is processed without the user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use healthsync_common::{DataTag, Error, HealthData, Result};

use crate::engine::{panic_message, ExportOutcome, QueueProcessor};
use crate::queue::NewPendingExport;
use crate::service::{ExportDisposition, ExportService};
use crate::settings::SyncMetadata;

/// Minimum wake interval iOS grants background fetches.
pub const IOS_MINIMUM_INTERVAL_MINUTES: u32 = 15;

/// Default task identifier.
pub const DEFAULT_TASK_NAME: &str = "healthsync-background-export";

/// Host platform, which decides how wake intervals are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    #[default]
    Desktop,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
            Platform::Desktop => write!(f, "desktop"),
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "desktop" | "linux" | "macos" | "windows" => Ok(Platform::Desktop),
            other => Err(Error::InvalidInput(format!("Unknown platform: {}", other))),
        }
    }
}

/// Effective wake interval for a requested interval.
///
/// iOS wakes apps on its own schedule, never more often than every
/// fifteen minutes; the fixed floor is registered there whatever the user
/// asked for. Everywhere else the requested interval is used as is.
pub fn resolve_background_fetch_interval_minutes(
    platform: Platform,
    requested_minutes: u32,
) -> u32 {
    match platform {
        Platform::Ios => IOS_MINIMUM_INTERVAL_MINUTES,
        Platform::Android | Platform::Desktop => requested_minutes,
    }
}

/// Background execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackgroundConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub task_name: String,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 60,
            task_name: DEFAULT_TASK_NAME.to_string(),
        }
    }
}

/// Whether the host lets the app run in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundTaskStatus {
    Available,
    Restricted,
    Denied,
}

/// Host facility that wakes registered tasks.
#[async_trait]
pub trait BackgroundTaskRegistry: Send + Sync {
    async fn register(&self, name: &str, minimum_interval: Duration) -> Result<()>;
    async fn unregister(&self, name: &str) -> Result<()>;
    async fn is_registered(&self, name: &str) -> Result<bool>;
    async fn status(&self) -> BackgroundTaskStatus;
}

/// Work a registry wakes up.
#[async_trait]
pub trait BackgroundTask: Send + Sync {
    async fn run(&self) -> BackgroundFetchResult;
}

/// Registry that wakes tasks from tokio timers inside this process.
pub struct InProcessTaskRegistry {
    task: Arc<dyn BackgroundTask>,
    status: BackgroundTaskStatus,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl InProcessTaskRegistry {
    pub fn new(task: Arc<dyn BackgroundTask>) -> Self {
        Self {
            task,
            status: BackgroundTaskStatus::Available,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Report a different availability, e.g. to mimic a restricted host.
    pub fn with_status(mut self, status: BackgroundTaskStatus) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
impl BackgroundTaskRegistry for InProcessTaskRegistry {
    async fn register(&self, name: &str, minimum_interval: Duration) -> Result<()> {
        if minimum_interval.is_zero() {
            return Err(Error::InvalidInput(
                "Background interval must be positive".to_string(),
            ));
        }

        let task = self.task.clone();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            // First wake after one full interval, like an OS scheduler.
            let mut ticker = interval_at(Instant::now() + minimum_interval, minimum_interval);
            loop {
                ticker.tick().await;
                debug!(task = %task_name, "Background task woke");
                let result = task.run().await;
                debug!(task = %task_name, ?result, "Background task finished");
            }
        });

        if let Some(previous) = self.handles.lock().await.insert(name.to_string(), handle) {
            previous.abort();
        }
        info!(
            task = name,
            interval_secs = minimum_interval.as_secs(),
            "Registered background task"
        );
        Ok(())
    }

    async fn unregister(&self, name: &str) -> Result<()> {
        if let Some(handle) = self.handles.lock().await.remove(name) {
            handle.abort();
            info!(task = name, "Unregistered background task");
        }
        Ok(())
    }

    async fn is_registered(&self, name: &str) -> Result<bool> {
        Ok(self.handles.lock().await.contains_key(name))
    }

    async fn status(&self) -> BackgroundTaskStatus {
        self.status
    }
}

/// What `BackgroundScheduler::apply` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationChange {
    Registered,
    Reregistered,
    Unregistered,
    Unchanged,
    /// Enabling was requested but the host does not allow background work.
    Unavailable(BackgroundTaskStatus),
}

/// Keeps the registry in line with the background settings.
pub struct BackgroundScheduler {
    registry: Arc<dyn BackgroundTaskRegistry>,
    platform: Platform,
    /// Task name of the last applied settings.
    applied_name: Mutex<Option<String>>,
}

impl BackgroundScheduler {
    pub fn new(registry: Arc<dyn BackgroundTaskRegistry>, platform: Platform) -> Self {
        Self {
            registry,
            platform,
            applied_name: Mutex::new(None),
        }
    }

    /// Apply background settings.
    ///
    /// Enabled and not registered registers; disabled and registered
    /// unregisters. Enabled and already registered re-registers so that the
    /// latest interval is in effect, even when it did not change. A task
    /// registered under a previously applied name is unregistered first.
    pub async fn apply(&self, config: &BackgroundConfig) -> Result<RegistrationChange> {
        let name = config.task_name.as_str();
        let mut applied_name = self.applied_name.lock().await;

        let mut removed_previous = false;
        if let Some(previous) = applied_name.as_deref().filter(|p| *p != name) {
            if self.registry.is_registered(previous).await? {
                self.registry.unregister(previous).await?;
                info!(from = previous, to = name, "Background task renamed");
                removed_previous = true;
            }
        }
        *applied_name = Some(name.to_string());

        let registered = self.registry.is_registered(name).await?;

        if !config.enabled {
            if registered {
                self.registry.unregister(name).await?;
                return Ok(RegistrationChange::Unregistered);
            }
            if removed_previous {
                return Ok(RegistrationChange::Unregistered);
            }
            return Ok(RegistrationChange::Unchanged);
        }

        let status = self.registry.status().await;
        if status != BackgroundTaskStatus::Available {
            warn!(?status, "Background execution unavailable");
            return Ok(RegistrationChange::Unavailable(status));
        }

        let minutes =
            resolve_background_fetch_interval_minutes(self.platform, config.interval_minutes);
        let interval = Duration::from_secs(u64::from(minutes) * 60);

        if registered {
            self.registry.unregister(name).await?;
            self.registry.register(name, interval).await?;
            debug!(task = name, minutes, "Re-registered background task");
            Ok(RegistrationChange::Reregistered)
        } else {
            self.registry.register(name, interval).await?;
            Ok(RegistrationChange::Registered)
        }
    }
}

/// Result reported to the host after a background run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundFetchResult {
    NewData,
    NoData,
    Failed,
}

/// Source of records newer than the last export.
#[async_trait]
pub trait HealthDataSource: Send + Sync {
    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<HealthData>;
}

/// What a background run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub queue: ExportOutcome,
    /// Records exported from freshly fetched data.
    pub exported_records: usize,
}

/// Tells the user a background run delivered something.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, language: Option<&str>, summary: &RunSummary);
}

/// One background wake: drain the queue, then export fresh data.
pub struct BackgroundRunner {
    processor: Arc<QueueProcessor>,
    service: Arc<ExportService>,
    metadata: Arc<SyncMetadata>,
    selected_tags: BTreeSet<DataTag>,
    source: Option<Arc<dyn HealthDataSource>>,
    notifier: Option<Arc<dyn CompletionNotifier>>,
}

impl BackgroundRunner {
    pub fn new(
        processor: Arc<QueueProcessor>,
        service: Arc<ExportService>,
        metadata: Arc<SyncMetadata>,
        selected_tags: BTreeSet<DataTag>,
    ) -> Self {
        Self {
            processor,
            service,
            metadata,
            selected_tags,
            source: None,
            notifier: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn HealthDataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run once. Never fails and never panics; problems yield `Failed`.
    pub async fn run(&self) -> BackgroundFetchResult {
        let (result, summary) = match AssertUnwindSafe(self.run_once()).catch_unwind().await {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                error!("Background run failed: {}", e);
                return BackgroundFetchResult::Failed;
            }
            Err(payload) => {
                error!("Background run panicked: {}", panic_message(payload));
                return BackgroundFetchResult::Failed;
            }
        };

        if result == BackgroundFetchResult::NewData {
            if let Some(notifier) = &self.notifier {
                let language = self.metadata.language().await.unwrap_or_else(|e| {
                    warn!("Failed to read language preference: {}", e);
                    None
                });
                notifier.notify(language.as_deref(), &summary).await;
            }
        }

        result
    }

    async fn run_once(&self) -> Result<(BackgroundFetchResult, RunSummary)> {
        let mut summary = RunSummary {
            queue: self.processor.process_queue().await,
            exported_records: 0,
        };

        if let Some(source) = &self.source {
            let since = self.metadata.last_sync().await?;
            let data = source.fetch_since(since).await?;

            if data.is_empty() {
                debug!("No new health records");
            } else {
                let job = NewPendingExport {
                    health_data: data,
                    selected_tags: self.selected_tags.clone(),
                    sync_date_range: None,
                };
                match self.service.export_now(job).await {
                    Ok(ExportDisposition::Exported(report)) => {
                        summary.exported_records = report.records;
                    }
                    Ok(ExportDisposition::Queued { id, reason }) => {
                        info!(job = %id, "Fresh data queued: {}", reason);
                    }
                    Err(Error::Validation(message)) => {
                        debug!("Nothing selected to export: {}", message);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let result = if summary.queue.success_count > 0 || summary.exported_records > 0 {
            BackgroundFetchResult::NewData
        } else if summary.queue.fail_count > 0 {
            BackgroundFetchResult::Failed
        } else {
            BackgroundFetchResult::NoData
        };
        Ok((result, summary))
    }
}

#[async_trait]
impl BackgroundTask for BackgroundRunner {
    async fn run(&self) -> BackgroundFetchResult {
        BackgroundRunner::run(self).await
    }
}
