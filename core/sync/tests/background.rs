//! Background runs and scheduling policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use healthsync_common::types::StepsRecord;
use healthsync_common::{parse_date_key, DataTag, Error, HealthData, Result};
use healthsync_storage::gdrive::escape_query_value;
use healthsync_storage::{MemoryAdapters, MemoryKeyValueStore};
use healthsync_sync::{
    resolve_background_fetch_interval_minutes, AppContext, BackgroundFetchResult,
    CompletionNotifier, HealthDataSource, NetworkMonitor, NetworkStatus, NewPendingExport,
    Platform, RunSummary, SyncConfig,
};

struct FixedSource {
    data: HealthData,
    seen_since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl FixedSource {
    fn new(data: HealthData) -> Self {
        Self {
            data,
            seen_since: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HealthDataSource for FixedSource {
    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<HealthData> {
        self.seen_since.lock().await.push(since);
        Ok(self.data.clone())
    }
}

struct FailingSource;

#[async_trait]
impl HealthDataSource for FailingSource {
    async fn fetch_since(&self, _since: Option<DateTime<Utc>>) -> Result<HealthData> {
        Err(Error::storage("PERMISSION_DENIED", "Health access revoked"))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<(Option<String>, usize)>>,
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, language: Option<&str>, summary: &RunSummary) {
        self.notices.lock().await.push((
            language.map(String::from),
            summary.queue.success_count + summary.exported_records,
        ));
    }
}

fn steps(date: &str, count: u64) -> HealthData {
    HealthData {
        steps: vec![StepsRecord {
            date: parse_date_key(date).unwrap(),
            count,
        }],
        ..Default::default()
    }
}

fn context(status: NetworkStatus) -> AppContext {
    AppContext::new(
        SyncConfig::default(),
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(MemoryAdapters::new()),
        Arc::new(NetworkMonitor::new(status)),
    )
}

#[tokio::test]
async fn test_idle_run_is_silent() {
    let ctx = context(NetworkStatus::Online);
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = ctx
        .background_runner()
        .with_source(Arc::new(FixedSource::new(HealthData::default())))
        .with_notifier(notifier.clone());

    assert_eq!(runner.run().await, BackgroundFetchResult::NoData);
    assert!(notifier.notices.lock().await.is_empty());
}

#[tokio::test]
async fn test_fresh_data_is_exported_and_announced() {
    let ctx = context(NetworkStatus::Online);
    ctx.metadata.set_language("de").await.unwrap();
    let source = Arc::new(FixedSource::new(steps("2025-03-01", 4200)));
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = ctx
        .background_runner()
        .with_source(source.clone())
        .with_notifier(notifier.clone());

    assert_eq!(runner.run().await, BackgroundFetchResult::NewData);
    assert_eq!(
        *notifier.notices.lock().await,
        vec![(Some("de".to_string()), 1)]
    );

    // The next run asks only for records after the recorded sync
    runner.run().await;
    let seen = source.seen_since.lock().await;
    assert!(seen[0].is_none());
    assert!(seen[1].is_some());
}

#[tokio::test]
async fn test_queue_activity_counts_as_new_data() {
    let ctx = context(NetworkStatus::Online);
    ctx.queue
        .add(NewPendingExport {
            health_data: steps("2025-01-01", 10),
            selected_tags: [DataTag::Steps].into_iter().collect(),
            sync_date_range: None,
        })
        .await
        .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = ctx.background_runner().with_notifier(notifier.clone());

    assert_eq!(runner.run().await, BackgroundFetchResult::NewData);
    assert_eq!(notifier.notices.lock().await.len(), 1);
    assert_eq!(ctx.queue.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_offline_run_queues_fresh_data() {
    let ctx = context(NetworkStatus::Offline);
    let runner = ctx
        .background_runner()
        .with_source(Arc::new(FixedSource::new(steps("2025-03-01", 1))));

    assert_eq!(runner.run().await, BackgroundFetchResult::NoData);
    assert_eq!(ctx.queue.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_source_failure_is_reported_as_failed() {
    let ctx = context(NetworkStatus::Online);
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = ctx
        .background_runner()
        .with_source(Arc::new(FailingSource))
        .with_notifier(notifier.clone());

    assert_eq!(runner.run().await, BackgroundFetchResult::Failed);
    assert!(notifier.notices.lock().await.is_empty());
}

#[test]
fn test_interval_floor_applies_only_to_ios() {
    assert_eq!(resolve_background_fetch_interval_minutes(Platform::Ios, 1440), 15);
    assert_eq!(
        resolve_background_fetch_interval_minutes(Platform::Android, 1440),
        1440
    );
}

#[test]
fn test_quotes_are_escaped_in_queries() {
    assert_eq!(escape_query_value("O'Reilly"), "O\\'Reilly");
}
