//! Queue processor: drains the export queue against the current network state.

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use healthsync_common::{Error, Result};
use healthsync_export::{ExportController, ExportReport};

use crate::network::{NetworkStatus, NetworkStatusProvider};
use crate::queue::{PendingExport, QueueStore};
use crate::retry::{eviction_message, has_exceeded_max_retries};
use crate::settings::SyncMetadata;

/// Summary of one queue run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub success_count: usize,
    pub fail_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<String>,
}

impl ExportOutcome {
    /// Check if the run touched no job.
    pub fn is_idle(&self) -> bool {
        self.success_count == 0 && self.fail_count == 0 && self.skipped_count == 0
    }
}

/// Clears the in-flight flag when a run ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Render a panic payload as a message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drains the export queue, one job at a time, oldest first.
pub struct QueueProcessor {
    queue: Arc<QueueStore>,
    controller: Arc<ExportController>,
    network: Arc<dyn NetworkStatusProvider>,
    metadata: Arc<SyncMetadata>,
    in_flight: AtomicBool,
    queue_length: watch::Sender<usize>,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<QueueStore>,
        controller: Arc<ExportController>,
        network: Arc<dyn NetworkStatusProvider>,
        metadata: Arc<SyncMetadata>,
    ) -> Self {
        let (queue_length, _rx) = watch::channel(0);
        Self {
            queue,
            controller,
            network,
            metadata,
            in_flight: AtomicBool::new(false),
            queue_length,
        }
    }

    /// Observe the number of queued jobs, published after every run.
    pub fn subscribe_queue_length(&self) -> watch::Receiver<usize> {
        self.queue_length.subscribe()
    }

    /// Check if a run is in progress.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run every queued job once.
    ///
    /// # Preconditions
    /// - None. Calling while offline or while another run is in progress
    ///   returns an empty outcome without touching the queue.
    ///
    /// # Postconditions
    /// - Succeeded jobs and evicted jobs are removed from the queue.
    /// - Failed jobs stay queued with their retry count incremented once.
    /// - If the network drops after a failure, the remaining jobs are left
    ///   untouched for the next run.
    /// - The remaining queue length has been published.
    ///
    /// Never fails: errors, including panics inside an attempt, are recorded
    /// in the outcome.
    pub async fn process_queue(&self) -> ExportOutcome {
        let mut outcome = ExportOutcome::default();

        if self.network.status() != NetworkStatus::Online {
            debug!("Offline; skipping queue run");
            return outcome;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Queue run already in progress; ignoring trigger");
            return outcome;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let jobs = match self.queue.list().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to read export queue: {}", e);
                outcome.errors.push(format!("Failed to read export queue: {}", e));
                return outcome;
            }
        };

        if !jobs.is_empty() {
            info!(jobs = jobs.len(), "Processing export queue");
        }

        for job in &jobs {
            if has_exceeded_max_retries(job) {
                let message = eviction_message(job);
                warn!(job = %job.id, retry_count = job.retry_count, "{}", message);
                outcome.skipped_count += 1;
                outcome.errors.push(message);
                self.remove_job(job, &mut outcome).await;
                continue;
            }

            match self.attempt(job).await {
                Ok(report) => {
                    info!(
                        job = %job.id,
                        documents = report.documents.len(),
                        "Queued export delivered"
                    );
                    outcome.success_count += 1;
                    self.remove_job(job, &mut outcome).await;
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(job = %job.id, "Queued export failed: {}", message);
                    outcome.fail_count += 1;
                    outcome
                        .errors
                        .push(format!("Export {} failed: {}", job.id, message));
                    if let Err(e) = self.queue.increment_retry(&job.id, &message).await {
                        error!(job = %job.id, "Failed to record attempt: {}", e);
                        outcome
                            .errors
                            .push(format!("Failed to record attempt for {}: {}", job.id, e));
                    }

                    if self.network.status() != NetworkStatus::Online {
                        info!("Network lost; leaving remaining jobs queued");
                        break;
                    }
                }
            }
        }

        if outcome.success_count > 0 {
            if let Err(e) = self.metadata.record_sync(Utc::now()).await {
                warn!("Failed to record sync time: {}", e);
            }
        }

        self.publish_queue_length().await;

        if !outcome.is_idle() {
            info!(
                success = outcome.success_count,
                failed = outcome.fail_count,
                skipped = outcome.skipped_count,
                "Queue run finished"
            );
        }
        outcome
    }

    /// One attempt of one job. Panics surface as `EXCEPTION` errors.
    async fn attempt(&self, job: &PendingExport) -> Result<ExportReport> {
        match AssertUnwindSafe(self.controller.export(job.request()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(Error::exception(format!(
                "Unexpected failure: {}",
                panic_message(payload)
            ))),
        }
    }

    async fn remove_job(&self, job: &PendingExport, outcome: &mut ExportOutcome) {
        if let Err(e) = self.queue.remove(&job.id).await {
            error!(job = %job.id, "Failed to remove job: {}", e);
            outcome
                .errors
                .push(format!("Failed to remove {}: {}", job.id, e));
        }
    }

    async fn publish_queue_length(&self) {
        match self.queue.count().await {
            Ok(count) => {
                self.queue_length.send_replace(count);
                debug!(remaining = count, "Published queue length");
            }
            Err(e) => warn!("Failed to count queued jobs: {}", e),
        }
    }
}
