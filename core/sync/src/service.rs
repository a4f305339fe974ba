//! Immediate exports that fall back to the queue.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use healthsync_common::Result;
use healthsync_export::{ExportController, ExportReport, ExportRequest};

use crate::network::{NetworkStatus, NetworkStatusProvider};
use crate::queue::{NewPendingExport, QueueStore};
use crate::settings::SyncMetadata;

/// What happened to an export request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ExportDisposition {
    /// Written to every enabled format.
    Exported(ExportReport),
    /// Deferred to the queue.
    Queued { id: String, reason: String },
}

/// Runs exports now when possible and queues them when not.
pub struct ExportService {
    controller: Arc<ExportController>,
    queue: Arc<QueueStore>,
    network: Arc<dyn NetworkStatusProvider>,
    metadata: Arc<SyncMetadata>,
}

impl ExportService {
    pub fn new(
        controller: Arc<ExportController>,
        queue: Arc<QueueStore>,
        network: Arc<dyn NetworkStatusProvider>,
        metadata: Arc<SyncMetadata>,
    ) -> Self {
        Self {
            controller,
            queue,
            network,
            metadata,
        }
    }

    /// Export now, or queue the export for later.
    ///
    /// The export is queued when the device is offline or when the attempt
    /// fails with an error a later attempt could get past.
    ///
    /// # Errors
    /// - `Validation` when nothing matches the selection; never queued
    /// - permanent failures such as revoked credentials; never queued
    /// - persistence failures while queueing
    pub async fn export_now(&self, job: NewPendingExport) -> Result<ExportDisposition> {
        if self.network.status() != NetworkStatus::Online {
            let id = self.queue.add(job).await?;
            info!(job = %id, "Offline; export queued");
            return Ok(ExportDisposition::Queued {
                id,
                reason: NetworkStatus::Offline.to_string(),
            });
        }

        let attempt = self
            .controller
            .export(ExportRequest {
                health_data: &job.health_data,
                selected_tags: &job.selected_tags,
                sync_date_range: job.sync_date_range.as_ref(),
            })
            .await;

        match attempt {
            Ok(report) => {
                if let Err(e) = self.metadata.record_sync(Utc::now()).await {
                    warn!("Failed to record sync time: {}", e);
                }
                Ok(ExportDisposition::Exported(report))
            }
            Err(e) if e.is_retryable() => {
                let reason = e.to_string();
                let id = self.queue.add(job).await?;
                warn!(job = %id, "Export failed, queued for retry: {}", reason);
                Ok(ExportDisposition::Queued { id, reason })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkMonitor;
    use healthsync_common::error::AUTH_REVOKED_CODE;
    use healthsync_common::types::StepsRecord;
    use healthsync_common::{parse_date_key, DataTag, Error, HealthData};
    use healthsync_export::ExportConfig;
    use healthsync_storage::{MemoryAdapters, MemoryKeyValueStore};

    fn service(status: NetworkStatus) -> (ExportService, Arc<MemoryAdapters>, Arc<QueueStore>) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let adapters = Arc::new(MemoryAdapters::new());
        let queue = Arc::new(QueueStore::new(kv.clone()));
        let service = ExportService::new(
            Arc::new(ExportController::new(adapters.clone(), ExportConfig::default())),
            queue.clone(),
            Arc::new(NetworkMonitor::new(status)),
            Arc::new(SyncMetadata::new(kv)),
        );
        (service, adapters, queue)
    }

    fn job(tag: DataTag) -> NewPendingExport {
        NewPendingExport {
            health_data: HealthData {
                steps: vec![StepsRecord {
                    date: parse_date_key("2025-01-01").unwrap(),
                    count: 1000,
                }],
                ..Default::default()
            },
            selected_tags: [tag].into_iter().collect(),
            sync_date_range: None,
        }
    }

    #[tokio::test]
    async fn test_online_exports_directly() {
        let (service, _, queue) = service(NetworkStatus::Online);

        let disposition = service.export_now(job(DataTag::Steps)).await.unwrap();

        assert!(matches!(disposition, ExportDisposition::Exported(_)));
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_queues() {
        let (service, adapters, queue) = service(NetworkStatus::Offline);

        let disposition = service.export_now(job(DataTag::Steps)).await.unwrap();

        assert!(matches!(disposition, ExportDisposition::Queued { .. }));
        assert_eq!(queue.count().await.unwrap(), 1);
        assert_eq!(adapters.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_queues() {
        let (service, adapters, queue) = service(NetworkStatus::Online);
        adapters.files().fail_with_network("timeout").await;

        let disposition = service.export_now(job(DataTag::Steps)).await.unwrap();

        match disposition {
            ExportDisposition::Queued { reason, .. } => assert!(reason.contains("timeout")),
            other => panic!("expected queued, got {:?}", other),
        }
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validation_is_never_queued() {
        let (service, _, queue) = service(NetworkStatus::Online);

        let err = service.export_now(job(DataTag::Weight)).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revoked_credentials_are_not_queued() {
        let (service, adapters, queue) = service(NetworkStatus::Online);
        adapters.fail_connect(AUTH_REVOKED_CODE).await;

        let err = service.export_now(job(DataTag::Steps)).await.unwrap_err();

        assert_eq!(err.code(), Some(AUTH_REVOKED_CODE));
        assert_eq!(queue.count().await.unwrap(), 0);
    }
}
