//! Remote document contracts consumed by the exporters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use healthsync_common::Result;

/// MIME type of the flat delimited export.
pub const CSV_MIME_TYPE: &str = "text/csv";
/// MIME type Drive uses for native spreadsheets.
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";
/// MIME type of the printable spreadsheet snapshot.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Metadata for a remote file located by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Provider-specific identifier.
    pub id: String,
    /// Name of the file.
    pub name: String,
    /// MIME type as reported by the provider.
    pub mime_type: String,
    /// Last modification time, when known.
    pub modified: Option<DateTime<Utc>>,
}

/// Contents of the first sheet of a spreadsheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetData {
    /// First row.
    pub headers: Vec<String>,
    /// Every row after the header, in sheet order.
    pub rows: Vec<Vec<String>>,
}

/// Flat file operations against the remote file store.
///
/// Implementations must report transport failures as `Error::Network` and
/// rejected requests as `Error::Storage`, never by panicking.
#[async_trait]
pub trait FileOperations: Send + Sync {
    /// Find a non-trashed file by exact name and MIME type.
    ///
    /// # Returns
    /// `None` when no such file exists in the folder.
    async fn find_file(
        &self,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<FileInfo>>;

    /// Create a new file and return its identifier.
    async fn upload_file(
        &self,
        content: &str,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<String>;

    /// Replace the full content of an existing file.
    async fn update_file(&self, file_id: &str, content: &str, mime_type: &str) -> Result<bool>;

    /// Download the full content of a file as text.
    async fn download_file_content(&self, file_id: &str) -> Result<String>;
}

/// Row/column operations against the remote spreadsheet store.
///
/// Rows are 1-based; row 1 holds the headers.
#[async_trait]
pub trait SpreadsheetAdapter: Send + Sync {
    /// Find a spreadsheet by exact name.
    async fn find_spreadsheet(&self, name: &str, folder_id: Option<&str>)
        -> Result<Option<String>>;

    /// Create a spreadsheet whose first row is `headers`.
    async fn create_spreadsheet(
        &self,
        name: &str,
        headers: &[String],
        folder_id: Option<&str>,
    ) -> Result<String>;

    /// Read the header row and every data row.
    async fn get_sheet_data(&self, spreadsheet_id: &str) -> Result<SheetData>;

    /// Overwrite the header row.
    async fn update_headers(&self, spreadsheet_id: &str, headers: &[String]) -> Result<bool>;

    /// Write `rows` as one block starting at `start_row`.
    async fn update_rows(
        &self,
        spreadsheet_id: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Result<bool>;

    /// Render the spreadsheet as a PDF and return it base64-encoded.
    async fn fetch_pdf(&self, spreadsheet_id: &str) -> Result<String>;
}

/// Adapters bound to one freshly validated credential.
#[derive(Clone)]
pub struct RemoteSession {
    pub files: Arc<dyn FileOperations>,
    pub sheets: Arc<dyn SpreadsheetAdapter>,
}

/// Factory for remote adapters.
///
/// `connect` is the explicit refresh-if-needed step: it validates or
/// refreshes credentials and hands back adapters that carry the resulting
/// token for the duration of one batch of operations.
#[async_trait]
pub trait RemoteAdapters: Send + Sync {
    /// Get the provider name (e.g., "google", "memory").
    fn name(&self) -> &str;

    /// Refresh credentials if needed and bind adapters to them.
    async fn connect(&self) -> Result<RemoteSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_info_serialization() {
        let info = FileInfo {
            id: "file-1".to_string(),
            name: "health_data_2025.csv".to_string(),
            mime_type: CSV_MIME_TYPE.to_string(),
            modified: Some(Utc::now()),
        };

        let json = serde_json::to_string(&info).unwrap();
        let deserialized: FileInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, info);
    }
}
