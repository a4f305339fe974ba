//! Per-year spreadsheets in the remote folder.
//!
//! The spreadsheet keeps its header in row 1 and data from row 2 on. When a
//! merge needs columns the stored header lacks, the header is rewritten
//! before any row is written, so that no row lands under the wrong column.
//!
//! Writes only touch the cells they carry. When the merged table is smaller
//! than what is stored (duplicate dates collapsed, blank rows dropped, stray
//! header cells removed) the written block is padded with empty cells over
//! the whole stored extent.

use tracing::{debug, info, warn};

use healthsync_common::{Error, Result};
use healthsync_storage::SpreadsheetAdapter;

use crate::merge::merge;
use crate::report::{DocumentWrite, ExportFormat, PdfSnapshot, WriteAction};
use crate::table::DailyTable;

/// First data row; row 1 holds the header.
pub const FIRST_DATA_ROW: usize = 2;

/// Name of the spreadsheet holding one calendar year.
pub fn spreadsheet_name(year: i32) -> String {
    format!("Health Data {}", year)
}

/// Outcome of a spreadsheet export.
#[derive(Debug, Clone, Default)]
pub struct SpreadsheetExport {
    pub writes: Vec<DocumentWrite>,
    pub pdfs: Vec<PdfSnapshot>,
}

/// Writes daily tables into per-year spreadsheets, merging with what is stored.
pub struct SpreadsheetExporter<'a> {
    sheets: &'a dyn SpreadsheetAdapter,
    folder_id: Option<&'a str>,
}

impl<'a> SpreadsheetExporter<'a> {
    pub fn new(sheets: &'a dyn SpreadsheetAdapter, folder_id: Option<&'a str>) -> Self {
        Self { sheets, folder_id }
    }

    /// Export every year present in `table`.
    ///
    /// When `include_pdf` is set, a rendered snapshot of each written
    /// spreadsheet is fetched afterwards. Snapshot failures are logged and do
    /// not fail the export.
    ///
    /// # Errors
    /// Stops at the first year that fails and returns its error.
    pub async fn export(
        &self,
        table: &DailyTable,
        include_pdf: bool,
    ) -> Result<SpreadsheetExport> {
        let mut result = SpreadsheetExport::default();

        for (year, year_table) in table.split_by_year() {
            result.writes.push(self.export_year(year, &year_table).await?);
        }

        if include_pdf {
            for write in &result.writes {
                match self.sheets.fetch_pdf(&write.document_id).await {
                    Ok(content) => result.pdfs.push(PdfSnapshot {
                        year: write.year,
                        name: write.name.clone(),
                        content,
                    }),
                    Err(e) => warn!(document = %write.name, "PDF snapshot failed: {}", e),
                }
            }
        }

        Ok(result)
    }

    async fn export_year(&self, year: i32, table: &DailyTable) -> Result<DocumentWrite> {
        let name = spreadsheet_name(year);

        let existing = self
            .sheets
            .find_spreadsheet(&name, self.folder_id)
            .await?;

        let Some(id) = existing else {
            let merged = merge(&[], &[], table)?;
            let id = self
                .sheets
                .create_spreadsheet(&name, &merged.header, self.folder_id)
                .await?;
            self.write_rows(&id, &merged.rows).await?;
            info!(document = %name, rows = merged.rows.len(), "Created spreadsheet");
            return Ok(DocumentWrite {
                format: ExportFormat::Spreadsheet,
                year,
                name,
                document_id: id,
                action: WriteAction::Created,
                rows: merged.rows.len(),
            });
        };

        let stored = self.sheets.get_sheet_data(&id).await?;
        debug!(document = %name, stored_rows = stored.rows.len(), "Merging into spreadsheet");

        let merged = merge(&stored.headers, &stored.rows, table)?;
        let width = stored
            .rows
            .iter()
            .map(Vec::len)
            .chain([stored.headers.len(), merged.header.len()])
            .max()
            .unwrap_or_default();

        if merged.header_changed {
            debug!(
                document = %name,
                from = stored.headers.len(),
                to = merged.header.len(),
                "Rewriting spreadsheet header"
            );
            let header = padded(&merged.header, stored.headers.len());
            if !self.sheets.update_headers(&id, &header).await? {
                return Err(rejected(&name));
            }
        }

        let mut block: Vec<Vec<String>> = merged.rows.iter().map(|r| padded(r, width)).collect();
        if stored.rows.len() > block.len() {
            debug!(
                document = %name,
                cleared = stored.rows.len() - block.len(),
                "Clearing leftover spreadsheet rows"
            );
            block.resize(stored.rows.len(), vec![String::new(); width]);
        }
        self.write_rows(&id, &block).await?;

        info!(document = %name, rows = merged.rows.len(), "Updated spreadsheet");
        Ok(DocumentWrite {
            format: ExportFormat::Spreadsheet,
            year,
            name,
            document_id: id,
            action: WriteAction::Updated,
            rows: merged.rows.len(),
        })
    }

    /// Write the full data block in one batch. No rows means no call.
    async fn write_rows(&self, id: &str, rows: &[Vec<String>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if !self.sheets.update_rows(id, FIRST_DATA_ROW, rows).await? {
            return Err(rejected(id));
        }
        Ok(())
    }
}

/// `row` extended with empty cells up to `width`.
fn padded(row: &[String], width: usize) -> Vec<String> {
    let mut row = row.to_vec();
    if row.len() < width {
        row.resize(width, String::new());
    }
    row
}

fn rejected(document: &str) -> Error {
    Error::storage(
        "UPDATE_REJECTED",
        format!("Update of {} was not accepted", document),
    )
}
