//! Shared services, built once at startup and passed to whoever needs them.

use std::sync::Arc;

use healthsync_export::ExportController;
use healthsync_storage::{KeyValueStore, RemoteAdapters};

use crate::config::SyncConfig;
use crate::engine::QueueProcessor;
use crate::network::NetworkStatusProvider;
use crate::queue::QueueStore;
use crate::scheduler::BackgroundRunner;
use crate::service::ExportService;
use crate::settings::SyncMetadata;

/// Every long-lived service of the engine, wired together.
///
/// Tests build one over in-memory stores; the binary builds one over the
/// file store and the Google adapters.
#[derive(Clone)]
pub struct AppContext {
    pub config: SyncConfig,
    pub adapters: Arc<dyn RemoteAdapters>,
    pub network: Arc<dyn NetworkStatusProvider>,
    pub queue: Arc<QueueStore>,
    pub metadata: Arc<SyncMetadata>,
    pub controller: Arc<ExportController>,
    pub processor: Arc<QueueProcessor>,
    pub service: Arc<ExportService>,
}

impl AppContext {
    pub fn new(
        config: SyncConfig,
        kv: Arc<dyn KeyValueStore>,
        adapters: Arc<dyn RemoteAdapters>,
        network: Arc<dyn NetworkStatusProvider>,
    ) -> Self {
        let queue = Arc::new(QueueStore::new(kv.clone()));
        let metadata = Arc::new(SyncMetadata::new(kv));
        let controller = Arc::new(ExportController::new(
            adapters.clone(),
            config.export.clone(),
        ));
        let processor = Arc::new(QueueProcessor::new(
            queue.clone(),
            controller.clone(),
            network.clone(),
            metadata.clone(),
        ));
        let service = Arc::new(ExportService::new(
            controller.clone(),
            queue.clone(),
            network.clone(),
            metadata.clone(),
        ));

        Self {
            config,
            adapters,
            network,
            queue,
            metadata,
            controller,
            processor,
            service,
        }
    }

    /// Background runner exporting the configured series.
    pub fn background_runner(&self) -> BackgroundRunner {
        BackgroundRunner::new(
            self.processor.clone(),
            self.service.clone(),
            self.metadata.clone(),
            self.config.selected_tags.clone(),
        )
    }
}
