//! Keyed persistence for small local state documents.

use async_trait::async_trait;

use healthsync_common::{Error, Result};

/// Durable string store addressed by key.
///
/// Each key holds one whole document. Callers read the document, modify it
/// in memory and write it back; there are no partial updates.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the document stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the document stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the document stored under `key`. Missing keys are ignored.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Check that a key is safe to use as a file name.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Storage key cannot be empty".to_string()));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidInput(format!(
            "Storage key contains unsupported characters: {}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("offline_export_queue").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../escape").is_err());
    }
}
