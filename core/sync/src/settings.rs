//! Small persisted settings next to the queue.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use healthsync_common::{Error, Result};
use healthsync_storage::KeyValueStore;

/// Storage key of the last successful export time (RFC 3339).
pub const LAST_SYNC_KEY: &str = "last_sync_timestamp";
/// Storage key of the user's language preference.
pub const LANGUAGE_KEY: &str = "user_language";

/// Last sync time and language preference.
pub struct SyncMetadata {
    kv: Arc<dyn KeyValueStore>,
}

impl SyncMetadata {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Time of the last successful export, if any.
    pub async fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.kv.get(LAST_SYNC_KEY).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| Error::Serialization(format!("Invalid last sync timestamp: {}", e)))
    }

    pub async fn record_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.kv.set(LAST_SYNC_KEY, &at.to_rfc3339()).await
    }

    /// Language used for notification text, e.g. `en` or `de`.
    pub async fn language(&self) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(LANGUAGE_KEY)
            .await?
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty()))
    }

    pub async fn set_language(&self, language: &str) -> Result<()> {
        self.kv.set(LANGUAGE_KEY, language).await
    }
}
