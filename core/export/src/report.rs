//! What an export wrote.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Document format an exporter writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportFormat {
    Csv,
    Spreadsheet,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "CSV"),
            ExportFormat::Spreadsheet => write!(f, "Spreadsheet"),
        }
    }
}

/// How a document was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteAction {
    Created,
    Updated,
}

/// One document written by an exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWrite {
    pub format: ExportFormat,
    pub year: i32,
    pub name: String,
    pub document_id: String,
    pub action: WriteAction,
    /// Data rows in the document after the write.
    pub rows: usize,
}

/// Rendered snapshot of a spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfSnapshot {
    pub year: i32,
    pub name: String,
    /// Base64-encoded PDF bytes.
    pub content: String,
}

/// Summary of one successful export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    /// Records exported after filtering.
    pub records: usize,
    pub documents: Vec<DocumentWrite>,
    pub pdfs: Vec<PdfSnapshot>,
}

impl ExportReport {
    /// Documents written in the given format.
    pub fn documents_for(&self, format: ExportFormat) -> impl Iterator<Item = &DocumentWrite> {
        self.documents.iter().filter(move |d| d.format == format)
    }
}
