//! In-memory stores for testing.
//!
//! Everything here keeps its data in process memory and loses it on drop.
//! The remote fakes record every call they receive so tests can assert on
//! the exact sequence of writes, and can be told to fail like an
//! unreachable network.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::kv::{validate_key, KeyValueStore};
use crate::provider::{
    FileInfo, FileOperations, RemoteAdapters, RemoteSession, SheetData, SpreadsheetAdapter,
};
use healthsync_common::{Error, Result};

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    documents: RwLock<HashMap<String, String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryKeyValueStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls seen so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set` and `remove` calls seen so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.documents
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.documents.write().await.remove(key);
        Ok(())
    }
}

/// A call received by one of the remote fakes.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    FindFile { name: String },
    UploadFile { name: String, content: String },
    UpdateFile { id: String, content: String },
    DownloadFile { id: String },
    FindSpreadsheet { name: String },
    CreateSpreadsheet { name: String, headers: Vec<String> },
    GetSheetData { id: String },
    UpdateHeaders { id: String, headers: Vec<String> },
    UpdateRows {
        id: String,
        start_row: usize,
        rows: Vec<Vec<String>>,
    },
    FetchPdf { id: String },
}

/// Shared call log and failure switch.
#[derive(Default)]
struct CallRecorder {
    calls: RwLock<Vec<RemoteCall>>,
    failure: RwLock<Option<String>>,
}

impl CallRecorder {
    async fn record(&self, call: RemoteCall) -> Result<()> {
        self.calls.write().await.push(call);
        match self.failure.read().await.as_ref() {
            Some(message) => Err(Error::Network(message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    mime_type: String,
    folder_id: Option<String>,
    content: String,
}

/// In-memory flat file store.
#[derive(Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, StoredFile>>,
    recorder: CallRecorder,
}

impl MemoryFileStore {
    /// Create a new empty file store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with a network error.
    pub async fn fail_with_network(&self, message: impl Into<String>) {
        *self.recorder.failure.write().await = Some(message.into());
    }

    /// Stop failing calls.
    pub async fn clear_failure(&self) {
        *self.recorder.failure.write().await = None;
    }

    /// Calls received so far.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.recorder.calls.read().await.clone()
    }

    /// Seed a file without recording a call. Returns its id.
    pub async fn insert_file(&self, name: &str, mime_type: &str, content: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.files.write().await.insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                folder_id: None,
                content: content.to_string(),
            },
        );
        id
    }

    /// Current content of the file with the given name.
    pub async fn content_by_name(&self, name: &str) -> Option<String> {
        self.files
            .read()
            .await
            .values()
            .find(|f| f.name == name)
            .map(|f| f.content.clone())
    }

    /// Number of stored files.
    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl FileOperations for MemoryFileStore {
    async fn find_file(
        &self,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<FileInfo>> {
        self.recorder
            .record(RemoteCall::FindFile {
                name: name.to_string(),
            })
            .await?;

        let files = self.files.read().await;
        let found = files.iter().find(|(_, f)| {
            f.name == name
                && f.mime_type == mime_type
                && folder_id.map_or(true, |folder| f.folder_id.as_deref() == Some(folder))
        });

        Ok(found.map(|(id, f)| FileInfo {
            id: id.clone(),
            name: f.name.clone(),
            mime_type: f.mime_type.clone(),
            modified: Some(Utc::now()),
        }))
    }

    async fn upload_file(
        &self,
        content: &str,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<String> {
        self.recorder
            .record(RemoteCall::UploadFile {
                name: name.to_string(),
                content: content.to_string(),
            })
            .await?;

        let id = Uuid::new_v4().to_string();
        self.files.write().await.insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                folder_id: folder_id.map(String::from),
                content: content.to_string(),
            },
        );
        Ok(id)
    }

    async fn update_file(&self, file_id: &str, content: &str, mime_type: &str) -> Result<bool> {
        self.recorder
            .record(RemoteCall::UpdateFile {
                id: file_id.to_string(),
                content: content.to_string(),
            })
            .await?;

        let mut files = self.files.write().await;
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", file_id)))?;
        file.content = content.to_string();
        file.mime_type = mime_type.to_string();
        Ok(true)
    }

    async fn download_file_content(&self, file_id: &str) -> Result<String> {
        self.recorder
            .record(RemoteCall::DownloadFile {
                id: file_id.to_string(),
            })
            .await?;

        self.files
            .read()
            .await
            .get(file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", file_id)))
    }
}

#[derive(Debug, Clone)]
struct StoredSheet {
    name: String,
    folder_id: Option<String>,
    /// Row 0 is the header row.
    grid: Vec<Vec<String>>,
}

/// In-memory spreadsheet store.
#[derive(Default)]
pub struct MemorySpreadsheetStore {
    sheets: RwLock<HashMap<String, StoredSheet>>,
    recorder: CallRecorder,
}

impl MemorySpreadsheetStore {
    /// Create a new empty spreadsheet store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with a network error.
    pub async fn fail_with_network(&self, message: impl Into<String>) {
        *self.recorder.failure.write().await = Some(message.into());
    }

    /// Stop failing calls.
    pub async fn clear_failure(&self) {
        *self.recorder.failure.write().await = None;
    }

    /// Calls received so far.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.recorder.calls.read().await.clone()
    }

    /// Seed a spreadsheet without recording a call. Returns its id.
    pub async fn insert_sheet(&self, name: &str, grid: Vec<Vec<String>>) -> String {
        let id = Uuid::new_v4().to_string();
        self.sheets.write().await.insert(
            id.clone(),
            StoredSheet {
                name: name.to_string(),
                folder_id: None,
                grid,
            },
        );
        id
    }

    /// Full grid (header included) of the spreadsheet with the given name.
    pub async fn grid_by_name(&self, name: &str) -> Option<Vec<Vec<String>>> {
        self.sheets
            .read()
            .await
            .values()
            .find(|s| s.name == name)
            .map(|s| s.grid.clone())
    }

    async fn with_sheet<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredSheet) -> T,
    ) -> Result<T> {
        let mut sheets = self.sheets.write().await;
        let sheet = sheets
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Spreadsheet not found: {}", id)))?;
        Ok(f(sheet))
    }
}

/// Cells past the end of `values` keep their content, as with a ranged
/// values update.
fn overwrite_cells(target: &mut Vec<String>, values: &[String]) {
    if target.len() < values.len() {
        target.resize(values.len(), String::new());
    }
    target[..values.len()].clone_from_slice(values);
}

#[async_trait]
impl SpreadsheetAdapter for MemorySpreadsheetStore {
    async fn find_spreadsheet(
        &self,
        name: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<String>> {
        self.recorder
            .record(RemoteCall::FindSpreadsheet {
                name: name.to_string(),
            })
            .await?;

        let sheets = self.sheets.read().await;
        Ok(sheets
            .iter()
            .find(|(_, s)| {
                s.name == name
                    && folder_id.map_or(true, |folder| s.folder_id.as_deref() == Some(folder))
            })
            .map(|(id, _)| id.clone()))
    }

    async fn create_spreadsheet(
        &self,
        name: &str,
        headers: &[String],
        folder_id: Option<&str>,
    ) -> Result<String> {
        self.recorder
            .record(RemoteCall::CreateSpreadsheet {
                name: name.to_string(),
                headers: headers.to_vec(),
            })
            .await?;

        let id = Uuid::new_v4().to_string();
        self.sheets.write().await.insert(
            id.clone(),
            StoredSheet {
                name: name.to_string(),
                folder_id: folder_id.map(String::from),
                grid: vec![headers.to_vec()],
            },
        );
        Ok(id)
    }

    async fn get_sheet_data(&self, spreadsheet_id: &str) -> Result<SheetData> {
        self.recorder
            .record(RemoteCall::GetSheetData {
                id: spreadsheet_id.to_string(),
            })
            .await?;

        self.with_sheet(spreadsheet_id, |sheet| {
            let mut rows = sheet.grid.iter().cloned();
            SheetData {
                headers: rows.next().unwrap_or_default(),
                rows: rows.collect(),
            }
        })
        .await
    }

    async fn update_headers(&self, spreadsheet_id: &str, headers: &[String]) -> Result<bool> {
        self.recorder
            .record(RemoteCall::UpdateHeaders {
                id: spreadsheet_id.to_string(),
                headers: headers.to_vec(),
            })
            .await?;

        self.with_sheet(spreadsheet_id, |sheet| {
            if sheet.grid.is_empty() {
                sheet.grid.push(Vec::new());
            }
            overwrite_cells(&mut sheet.grid[0], headers);
            true
        })
        .await
    }

    async fn update_rows(
        &self,
        spreadsheet_id: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Result<bool> {
        self.recorder
            .record(RemoteCall::UpdateRows {
                id: spreadsheet_id.to_string(),
                start_row,
                rows: rows.to_vec(),
            })
            .await?;

        if start_row == 0 {
            return Err(Error::InvalidInput("Rows are 1-based".to_string()));
        }

        self.with_sheet(spreadsheet_id, |sheet| {
            for (offset, row) in rows.iter().enumerate() {
                let index = start_row - 1 + offset;
                if sheet.grid.len() <= index {
                    sheet.grid.resize(index + 1, Vec::new());
                }
                overwrite_cells(&mut sheet.grid[index], row);
            }
            true
        })
        .await
    }

    async fn fetch_pdf(&self, spreadsheet_id: &str) -> Result<String> {
        self.recorder
            .record(RemoteCall::FetchPdf {
                id: spreadsheet_id.to_string(),
            })
            .await?;

        let rendered = self
            .with_sheet(spreadsheet_id, |sheet| {
                sheet
                    .grid
                    .iter()
                    .map(|row| row.join("\t"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(rendered))
    }
}

/// Adapter factory handing out the in-memory fakes.
pub struct MemoryAdapters {
    files: Arc<MemoryFileStore>,
    sheets: Arc<MemorySpreadsheetStore>,
    connect_failure: RwLock<Option<String>>,
    connects: AtomicUsize,
}

impl MemoryAdapters {
    /// Create a factory over fresh empty stores.
    pub fn new() -> Self {
        Self::with_stores(
            Arc::new(MemoryFileStore::new()),
            Arc::new(MemorySpreadsheetStore::new()),
        )
    }

    /// Create a factory over existing stores.
    pub fn with_stores(files: Arc<MemoryFileStore>, sheets: Arc<MemorySpreadsheetStore>) -> Self {
        Self {
            files,
            sheets,
            connect_failure: RwLock::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    /// The file store behind this factory.
    pub fn files(&self) -> Arc<MemoryFileStore> {
        self.files.clone()
    }

    /// The spreadsheet store behind this factory.
    pub fn sheets(&self) -> Arc<MemorySpreadsheetStore> {
        self.sheets.clone()
    }

    /// Make `connect` fail with a storage error carrying `code`.
    pub async fn fail_connect(&self, code: impl Into<String>) {
        *self.connect_failure.write().await = Some(code.into());
    }

    /// Number of sessions handed out.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Default for MemoryAdapters {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteAdapters for MemoryAdapters {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<RemoteSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.connect_failure.read().await.as_ref() {
            return Err(Error::storage(code.clone(), "Credential check failed"));
        }
        Ok(RemoteSession {
            files: self.files.clone(),
            sheets: self.sheets.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CSV_MIME_TYPE;

    #[tokio::test]
    async fn test_kv_roundtrip() {
        let store = MemoryKeyValueStore::new();
        store.set("user_language", "en").await.unwrap();
        assert_eq!(store.get("user_language").await.unwrap().as_deref(), Some("en"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_file_store_find_after_upload() {
        let store = MemoryFileStore::new();
        let id = store
            .upload_file("a,b\n", "health_data_2025.csv", CSV_MIME_TYPE, Some("folder"))
            .await
            .unwrap();

        let found = store
            .find_file("health_data_2025.csv", CSV_MIME_TYPE, Some("folder"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);

        let elsewhere = store
            .find_file("health_data_2025.csv", CSV_MIME_TYPE, Some("other"))
            .await
            .unwrap();
        assert!(elsewhere.is_none());
    }

    #[tokio::test]
    async fn test_file_store_failure_switch() {
        let store = MemoryFileStore::new();
        store.fail_with_network("airplane mode").await;

        let err = store
            .find_file("x.csv", CSV_MIME_TYPE, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));

        store.clear_failure().await;
        assert!(store.find_file("x.csv", CSV_MIME_TYPE, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_sheet_update_rows_extends_grid() {
        let store = MemorySpreadsheetStore::new();
        let headers = vec!["Date".to_string(), "Steps".to_string()];
        let id = store
            .create_spreadsheet("Health Data 2025", &headers, None)
            .await
            .unwrap();

        let rows = vec![
            vec!["2025-01-01".to_string(), "10".to_string()],
            vec!["2025-01-02".to_string(), "20".to_string()],
        ];
        store.update_rows(&id, 2, &rows).await.unwrap();

        let data = store.get_sheet_data(&id).await.unwrap();
        assert_eq!(data.headers, headers);
        assert_eq!(data.rows, rows);
    }

    #[tokio::test]
    async fn test_sheet_update_rows_keeps_cells_past_written_width() {
        let store = MemorySpreadsheetStore::new();
        let id = store
            .insert_sheet(
                "Health Data 2025",
                vec![
                    vec!["Date".to_string(), "Steps".to_string()],
                    vec!["2025-01-01".to_string(), "10".to_string()],
                ],
            )
            .await;

        store
            .update_rows(&id, 2, &[vec!["2025-01-02".to_string()]])
            .await
            .unwrap();

        let data = store.get_sheet_data(&id).await.unwrap();
        assert_eq!(
            data.rows,
            vec![vec!["2025-01-02".to_string(), "10".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_adapters_connect_failure() {
        let adapters = MemoryAdapters::new();
        adapters.fail_connect("AUTH_REVOKED").await;

        let err = adapters.connect().await.err().unwrap();
        assert_eq!(err.code(), Some("AUTH_REVOKED"));
        assert_eq!(adapters.connect_count(), 1);
    }
}
