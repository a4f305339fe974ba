//! Durable queue of export jobs waiting for connectivity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use healthsync_common::{DataTag, Error, HealthData, Result};
use healthsync_export::ExportRequest;
use healthsync_storage::KeyValueStore;

/// Storage key of the queue document.
pub const QUEUE_KEY: &str = "offline_export_queue";

/// One deferred export attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingExport {
    /// Random v4 identifier, unique for the lifetime of the queue.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub health_data: HealthData,
    pub selected_tags: BTreeSet<DataTag>,
    /// Date keys the export is restricted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_date_range: Option<BTreeSet<String>>,
    /// Failed attempts so far. Never decreases.
    pub retry_count: u32,
    /// Message of the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingExport {
    /// View this job as an export request.
    pub fn request(&self) -> ExportRequest<'_> {
        ExportRequest {
            health_data: &self.health_data,
            selected_tags: &self.selected_tags,
            sync_date_range: self.sync_date_range.as_ref(),
        }
    }
}

/// Job contents supplied by the caller; the store assigns the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPendingExport {
    pub health_data: HealthData,
    pub selected_tags: BTreeSet<DataTag>,
    pub sync_date_range: Option<BTreeSet<String>>,
}

/// The persisted queue document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueData {
    /// Jobs ordered by creation time, oldest first.
    pub pending: Vec<PendingExport>,
    pub updated_at: DateTime<Utc>,
}

impl OfflineQueueData {
    /// Create an empty queue document.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl Default for OfflineQueueData {
    fn default() -> Self {
        Self::new()
    }
}

/// CRUD over the persisted queue document.
///
/// Every operation reads the whole document, changes it in memory and writes
/// the whole document back. Mutations hold `write_lock` from the read to the
/// write, so an `add` from an immediate export cannot be overwritten by the
/// queue processor removing a job at the same time. Reads take no lock.
pub struct QueueStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl QueueStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<OfflineQueueData> {
        match self.kv.get(QUEUE_KEY).await? {
            Some(json) => OfflineQueueData::from_json(&json),
            None => Ok(OfflineQueueData::new()),
        }
    }

    async fn save(&self, mut data: OfflineQueueData) -> Result<()> {
        data.updated_at = Utc::now();
        self.kv.set(QUEUE_KEY, &data.to_json()?).await
    }

    /// Append a job and return its id.
    ///
    /// # Errors
    /// Only persistence failures, which are not retried here.
    pub async fn add(&self, entry: NewPendingExport) -> Result<String> {
        let _write = self.write_lock.lock().await;
        let mut data = self.load().await?;

        let id = Uuid::new_v4().to_string();
        data.pending.push(PendingExport {
            id: id.clone(),
            created_at: Utc::now(),
            health_data: entry.health_data,
            selected_tags: entry.selected_tags,
            sync_date_range: entry.sync_date_range,
            retry_count: 0,
            last_error: None,
        });
        data.pending.sort_by_key(|job| job.created_at);

        let queued = data.pending.len();
        self.save(data).await?;

        info!(job = %id, queued, "Queued export");
        Ok(id)
    }

    /// Remove a job. Unknown ids are ignored.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let before = data.pending.len();
        data.pending.retain(|job| job.id != id);

        if data.pending.len() == before {
            debug!(job = %id, "Remove of unknown job ignored");
            return Ok(());
        }
        self.save(data).await
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Result<Vec<PendingExport>> {
        let mut pending = self.load().await?.pending;
        pending.sort_by_key(|job| job.created_at);
        Ok(pending)
    }

    /// Look up one job.
    pub async fn get(&self, id: &str) -> Result<Option<PendingExport>> {
        Ok(self
            .load()
            .await?
            .pending
            .into_iter()
            .find(|job| job.id == id))
    }

    /// Number of jobs.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.load().await?.pending.len())
    }

    /// Record a failed attempt. Unknown ids are ignored.
    pub async fn increment_retry(&self, id: &str, error_message: &str) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let mut data = self.load().await?;

        let Some(job) = data.pending.iter_mut().find(|job| job.id == id) else {
            debug!(job = %id, "Retry update for unknown job ignored");
            return Ok(());
        };
        job.retry_count = job.retry_count.saturating_add(1);
        job.last_error = Some(error_message.to_string());
        debug!(job = %id, retry_count = job.retry_count, "Recorded failed attempt");

        self.save(data).await
    }

    /// Drop every job.
    pub async fn clear(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        self.save(OfflineQueueData::new()).await?;
        info!("Cleared export queue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync_common::parse_date_key;
    use healthsync_common::types::StepsRecord;
    use async_trait::async_trait;
    use healthsync_storage::{FileKeyValueStore, MemoryKeyValueStore};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Reads return what was stored when the call started; writes land late.
    struct LaggingStore {
        inner: MemoryKeyValueStore,
    }

    #[async_trait]
    impl KeyValueStore for LaggingStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.inner.get(key).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            value
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
    }

    fn new_job(count: u64) -> NewPendingExport {
        NewPendingExport {
            health_data: HealthData {
                steps: vec![StepsRecord {
                    date: parse_date_key("2025-01-01").unwrap(),
                    count,
                }],
                ..Default::default()
            },
            selected_tags: [DataTag::Steps].into_iter().collect(),
            sync_date_range: None,
        }
    }

    #[tokio::test]
    async fn test_add_assigns_id_and_defaults() {
        let store = QueueStore::new(Arc::new(MemoryKeyValueStore::new()));

        let id = store.add(new_job(1)).await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();

        assert_eq!(job.retry_count, 0);
        assert!(job.last_error.is_none());
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_list_is_creation_ordered() {
        let store = QueueStore::new(Arc::new(MemoryKeyValueStore::new()));

        let first = store.add(new_job(1)).await.unwrap();
        let second = store.add(new_job(2)).await.unwrap();
        let third = store.add(new_job(3)).await.unwrap();

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_increment_retry_records_error() {
        let store = QueueStore::new(Arc::new(MemoryKeyValueStore::new()));
        let id = store.add(new_job(1)).await.unwrap();

        store.increment_retry(&id, "first").await.unwrap();
        store.increment_retry(&id, "second").await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.last_error.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_no_ops() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = QueueStore::new(kv.clone());
        store.add(new_job(1)).await.unwrap();
        let writes = kv.write_count();

        store.increment_retry("missing", "boom").await.unwrap();
        store.remove("missing").await.unwrap();

        assert_eq!(kv.write_count(), writes);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = QueueStore::new(Arc::new(MemoryKeyValueStore::new()));
        let a = store.add(new_job(1)).await.unwrap();
        store.add(new_job(2)).await.unwrap();

        store.remove(&a).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_add_and_remove_keep_both_changes() {
        let store = QueueStore::new(Arc::new(LaggingStore {
            inner: MemoryKeyValueStore::new(),
        }));
        let first = store.add(new_job(1)).await.unwrap();

        let (removed, added) = tokio::join!(store.remove(&first), store.add(new_job(2)));
        removed.unwrap();
        let second = added.unwrap();

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second]);
    }

    #[tokio::test]
    async fn test_overlapping_retries_are_all_counted() {
        let store = QueueStore::new(Arc::new(LaggingStore {
            inner: MemoryKeyValueStore::new(),
        }));
        let id = store.add(new_job(1)).await.unwrap();

        let (a, b) = tokio::join!(
            store.increment_retry(&id, "first"),
            store.increment_retry(&id, "second")
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(store.get(&id).await.unwrap().unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let temp = TempDir::new().unwrap();
        let id = {
            let kv = Arc::new(FileKeyValueStore::new(temp.path()).unwrap());
            QueueStore::new(kv).add(new_job(7)).await.unwrap()
        };

        let kv = Arc::new(FileKeyValueStore::new(temp.path()).unwrap());
        let reopened = QueueStore::new(kv);

        let jobs = reopened.list().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].health_data.steps[0].count, 7);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(QUEUE_KEY, "{not json").await.unwrap();
        let store = QueueStore::new(kv);

        assert!(matches!(
            store.list().await.unwrap_err(),
            Error::Serialization(_)
        ));
    }

    #[test]
    fn test_document_uses_camel_case() {
        let json = OfflineQueueData::new().to_json().unwrap();
        assert!(json.contains("\"pending\""));
        assert!(json.contains("\"updatedAt\""));
    }
}
