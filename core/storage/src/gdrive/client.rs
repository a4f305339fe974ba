//! Google Drive API client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use healthsync_common::{Error, Result};

use super::auth::AccessToken;
use crate::provider::{FileInfo, FileOperations};

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
/// Google Sheets API base URL.
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Fields requested for every file resource.
const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime";

/// Base URLs of the Google APIs used by the exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleEndpoints {
    pub drive_api: String,
    pub drive_upload: String,
    pub sheets_api: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            drive_api: DRIVE_API_BASE.to_string(),
            drive_upload: DRIVE_UPLOAD_BASE.to_string(),
            sheets_api: SHEETS_API_BASE.to_string(),
        }
    }
}

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    #[serde(default)]
    pub name: String,
    /// MIME type.
    #[serde(default)]
    pub mime_type: String,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
}

impl From<DriveFile> for FileInfo {
    fn from(file: DriveFile) -> Self {
        FileInfo {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            modified: file.modified_time,
        }
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Escape a literal for embedding inside a single-quoted Drive query string.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build the `q` parameter that locates a file by name and type.
pub fn name_query(name: &str, mime_type: &str, folder_id: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escape_query_value(name),
        escape_query_value(mime_type)
    );
    if let Some(folder) = folder_id {
        query.push_str(&format!(" and '{}' in parents", escape_query_value(folder)));
    }
    query
}

/// Google Drive API client bound to one access token.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    token: AccessToken,
    endpoints: GoogleEndpoints,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(http: Client, token: AccessToken, endpoints: GoogleEndpoints) -> Self {
        Self {
            http,
            token,
            endpoints,
        }
    }

    /// Find the first non-trashed file matching name, type and folder.
    pub async fn search(
        &self,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<DriveFile>> {
        let url = format!("{}/files", self.endpoints.drive_api);
        let query = name_query(name, mime_type, folder_id);
        let fields = format!("files({})", FILE_FIELDS);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .query(&[
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", "1"),
                ("spaces", "drive"),
            ])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to find file: {}", e)))?;

        let list_response: FileListResponse = handle_response(response).await?;
        Ok(list_response.files.into_iter().next())
    }

    /// Create a content-less file, e.g. a native spreadsheet.
    pub async fn create_empty(
        &self,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<DriveFile> {
        let url = format!("{}/files", self.endpoints.drive_api);

        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": mime_type
        });
        if let Some(parent) = folder_id {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create file: {}", e)))?;

        handle_response(response).await
    }

    /// Export a native document in another format.
    pub async fn export(&self, file_id: &str, mime_type: &str) -> Result<Vec<u8>> {
        let url = format!("{}/files/{}/export", self.endpoints.drive_api, file_id);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .query(&[("mimeType", mime_type)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to export file: {}", e)))?;

        let response = check_status(response).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Network(format!("Failed to read export response: {}", e)))
    }
}

#[async_trait]
impl FileOperations for DriveClient {
    async fn find_file(
        &self,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<FileInfo>> {
        Ok(self
            .search(name, mime_type, folder_id)
            .await?
            .map(FileInfo::from))
    }

    async fn upload_file(
        &self,
        content: &str,
        name: &str,
        mime_type: &str,
        folder_id: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/files", self.endpoints.drive_upload);

        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": mime_type
        });
        if let Some(parent) = folder_id {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let metadata_json = serde_json::to_string(&metadata)?;

        // Build multipart request
        let boundary = "HealthSyncBoundary";
        let mut body = Vec::new();

        // Metadata part
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata_json.as_bytes());
        body.extend_from_slice(b"\r\n");

        // Data part
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");

        // End boundary
        body.extend_from_slice(format!("--{}--", boundary).as_bytes());

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload file: {}", e)))?;

        let file: DriveFile = handle_response(response).await?;
        debug!(file_id = %file.id, name, "Created file");
        Ok(file.id)
    }

    async fn update_file(&self, file_id: &str, content: &str, mime_type: &str) -> Result<bool> {
        let url = format!("{}/files/{}", self.endpoints.drive_upload, file_id);

        let response = self
            .http
            .patch(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .header(header::CONTENT_TYPE, mime_type)
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to update file: {}", e)))?;

        let _: DriveFile = handle_response(response).await?;
        Ok(true)
    }

    async fn download_file_content(&self, file_id: &str) -> Result<String> {
        let url = format!("{}/files/{}", self.endpoints.drive_api, file_id);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to download file: {}", e)))?;

        let response = check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read download response: {}", e)))
    }
}

/// Map a non-success status to an error, passing successful responses through.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound("Resource not found".to_string()),
        StatusCode::UNAUTHORIZED => {
            Error::storage("UNAUTHORIZED", "Invalid or expired token")
        }
        StatusCode::FORBIDDEN => Error::storage("FORBIDDEN", format!("Access denied: {}", body)),
        _ => Error::storage(
            format!("HTTP_{}", status.as_u16()),
            format!("API error: {} - {}", status, body),
        ),
    })
}

/// Handle API response with error checking.
pub(crate) async fn handle_response<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T> {
    let response = check_status(response).await?;
    response.json().await.map_err(|e| {
        Error::storage(
            "MALFORMED_RESPONSE",
            format!("Failed to parse response: {}", e),
        )
    })
}
