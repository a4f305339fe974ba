//! Configuration file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use healthsync_common::{DataTag, Error, Result};
use healthsync_export::ExportConfig;
use healthsync_storage::gdrive::{GoogleEndpoints, OAuthClientConfig};

use crate::scheduler::{BackgroundConfig, Platform};

/// Application directory name under the platform data and config dirs.
const APP_DIR: &str = "healthsync";

/// Default data directory for the queue and settings documents.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default path of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

/// Google account settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoogleConfig {
    pub endpoints: GoogleEndpoints,
    /// OAuth client used to refresh expired access tokens.
    pub oauth_client: Option<OAuthClientConfig>,
    /// JSON file holding the current tokens.
    pub token_file: Option<PathBuf>,
}

/// Connectivity probe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    /// `host:port` the probe connects to.
    pub probe_address: String,
    pub probe_timeout_secs: u64,
    pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_address: "www.googleapis.com:443".to_string(),
            probe_timeout_secs: 5,
            probe_interval_secs: 30,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Where the queue and settings documents live.
    pub data_dir: Option<PathBuf>,
    pub platform: Platform,
    /// Series exported by background runs.
    pub selected_tags: BTreeSet<DataTag>,
    pub export: ExportConfig,
    pub background: BackgroundConfig,
    pub network: NetworkConfig,
    pub google: GoogleConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            platform: Platform::default(),
            selected_tags: DataTag::ALL.into_iter().collect(),
            export: ExportConfig::default(),
            background: BackgroundConfig::default(),
            network: NetworkConfig::default(),
            google: GoogleConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load from a file. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(content) => Self::from_json(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write to a file, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Data directory, falling back to the platform default.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
