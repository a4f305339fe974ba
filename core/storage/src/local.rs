//! Local filesystem key-value store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::kv::{validate_key, KeyValueStore};
use healthsync_common::Result;

/// Key-value store keeping one JSON document per key in a directory.
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    /// Create a new store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Directory holding the documents.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;

        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp_path = path.with_extension("json.tmp");

        // Rename is atomic on the same filesystem, so readers never see a torn document.
        fs::write(&tmp_path, value).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!(key, bytes = value.len(), "Persisted document");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_key_reads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();

        assert!(store.get("offline_export_queue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();

        store.set("user_language", "\"ja\"").await.unwrap();

        assert_eq!(
            store.get("user_language").await.unwrap().as_deref(),
            Some("\"ja\"")
        );
        assert!(!dir.path().join("user_language.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileKeyValueStore::new(dir.path()).unwrap();
            store.set("offline_export_queue", "{}").await.unwrap();
        }

        let reopened = FileKeyValueStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get("offline_export_queue").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();

        store.set("last_sync_timestamp", "x").await.unwrap();
        store.remove("last_sync_timestamp").await.unwrap();
        store.remove("last_sync_timestamp").await.unwrap();

        assert!(store.get("last_sync_timestamp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();

        assert!(store.set("../outside", "x").await.is_err());
    }

    #[test]
    fn test_creates_root() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileKeyValueStore::new(&nested).unwrap();
        assert!(store.root().exists());
    }
}
