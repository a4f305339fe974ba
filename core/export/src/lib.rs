//! Export engine for HealthSync.
//!
//! Turns health data into one row per date and reconciles those rows with
//! previously written remote documents. Two document formats are supported:
//! per-year CSV files and per-year spreadsheets. Both merge by date key, so
//! repeating an export never duplicates or reorders rows.

pub mod controller;
pub mod delimited;
pub mod merge;
pub mod report;
pub mod spreadsheet;
pub mod table;
pub mod tabular;

pub use controller::{ExportConfig, ExportController, ExportFormats, ExportRequest};
pub use merge::{merge, MergedTable};
pub use report::{DocumentWrite, ExportFormat, ExportReport, PdfSnapshot, WriteAction};
pub use spreadsheet::{spreadsheet_name, SpreadsheetExporter};
pub use table::DailyTable;
pub use tabular::{document_name, TabularExporter};
