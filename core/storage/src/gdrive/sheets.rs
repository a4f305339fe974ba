//! Google Sheets client.
//!
//! Spreadsheets are located, created and rendered through Drive; cell values
//! are read and written through the Sheets v4 values API. All reads and
//! writes target the first sheet of the document.

use async_trait::async_trait;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use healthsync_common::{Error, Result};

use super::auth::AccessToken;
use super::client::{handle_response, DriveClient, GoogleEndpoints};
use crate::a1::{block_range, column_letter};
use crate::provider::{SheetData, SpreadsheetAdapter, PDF_MIME_TYPE, SPREADSHEET_MIME_TYPE};

/// Range read by `get_sheet_data`; wide enough for any export.
const READ_RANGE: &str = "A:ZZZ";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeUpdate<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

/// Render a cell as the string the exporters compare against.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets client bound to one access token.
pub struct SheetsClient {
    drive: DriveClient,
    http: Client,
    token: AccessToken,
    endpoints: GoogleEndpoints,
}

impl SheetsClient {
    /// Create a new Sheets client.
    pub fn new(http: Client, token: AccessToken, endpoints: GoogleEndpoints) -> Self {
        Self {
            drive: DriveClient::new(http.clone(), token.clone(), endpoints.clone()),
            http,
            token,
            endpoints,
        }
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.endpoints.sheets_api,
            spreadsheet_id,
            utf8_percent_encode(range, NON_ALPHANUMERIC)
        )
    }

    async fn put_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<bool> {
        let url = self.values_url(spreadsheet_id, range);
        let update = ValueRangeUpdate {
            range,
            major_dimension: "ROWS",
            values,
        };

        let response = self
            .http
            .put(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .query(&[("valueInputOption", "RAW")])
            .json(&update)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to write values: {}", e)))?;

        let _: Value = handle_response(response).await?;
        debug!(spreadsheet_id, range, rows = values.len(), "Wrote values");
        Ok(true)
    }
}

#[async_trait]
impl SpreadsheetAdapter for SheetsClient {
    async fn find_spreadsheet(
        &self,
        name: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<String>> {
        Ok(self
            .drive
            .search(name, SPREADSHEET_MIME_TYPE, folder_id)
            .await?
            .map(|file| file.id))
    }

    async fn create_spreadsheet(
        &self,
        name: &str,
        headers: &[String],
        folder_id: Option<&str>,
    ) -> Result<String> {
        let file = self
            .drive
            .create_empty(name, SPREADSHEET_MIME_TYPE, folder_id)
            .await?;
        self.update_headers(&file.id, headers).await?;
        Ok(file.id)
    }

    async fn get_sheet_data(&self, spreadsheet_id: &str) -> Result<SheetData> {
        let url = self.values_url(spreadsheet_id, READ_RANGE);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, self.token.bearer())
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to read values: {}", e)))?;

        let range: ValueRange = handle_response(response).await?;
        let mut rows = range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());

        Ok(SheetData {
            headers: rows.next().unwrap_or_default(),
            rows: rows.collect(),
        })
    }

    async fn update_headers(&self, spreadsheet_id: &str, headers: &[String]) -> Result<bool> {
        if headers.is_empty() {
            return Err(Error::InvalidInput("Header row cannot be empty".to_string()));
        }
        let range = format!("A1:{}1", column_letter(headers.len()));
        self.put_values(spreadsheet_id, &range, &[headers.to_vec()])
            .await
    }

    async fn update_rows(
        &self,
        spreadsheet_id: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Result<bool> {
        if start_row == 0 {
            return Err(Error::InvalidInput("Rows are 1-based".to_string()));
        }
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let Some(range) = block_range(start_row, rows.len(), width) else {
            return Ok(true);
        };
        self.put_values(spreadsheet_id, &range, rows).await
    }

    async fn fetch_pdf(&self, spreadsheet_id: &str) -> Result<String> {
        let bytes = self.drive.export(spreadsheet_id, PDF_MIME_TYPE).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}
