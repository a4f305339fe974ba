//! Comma-separated text codec on top of the `csv` crate.
//!
//! Fields containing a comma, a quote or a line break are quoted, and quotes
//! inside them are doubled. Documents are written with `\n` line endings and a
//! trailing newline; reading accepts `\r\n` as well and ignores a leading BOM
//! and blank lines. Records may differ in length.

use healthsync_common::{Error, Result};

/// Error code for documents that cannot be parsed or lack a date column.
pub const MALFORMED_DOCUMENT_CODE: &str = "MALFORMED_DOCUMENT";

const BOM: char = '\u{feff}';

fn malformed(err: impl std::fmt::Display) -> Error {
    Error::storage(MALFORMED_DOCUMENT_CODE, err.to_string())
}

/// Encode a header and its rows as a complete document.
pub fn encode_document(header: &[String], rows: &[Vec<String>]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for record in std::iter::once(header).chain(rows.iter().map(Vec::as_slice)) {
        writer.write_record(record).map_err(malformed)?;
    }

    let bytes = writer.into_inner().map_err(|e| malformed(e.error()))?;
    String::from_utf8(bytes).map_err(malformed)
}

/// Parse a document into records.
///
/// A quoted field that is never closed runs to the end of the document.
///
/// # Errors
/// Returns `MALFORMED_DOCUMENT` when the reader rejects the content.
pub fn parse_document(content: &str) -> Result<Vec<Vec<String>>> {
    let content = content.strip_prefix(BOM).unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        let blank = record.len() == 1 && record[0].is_empty();
        if !blank {
            records.push(record.iter().map(String::from).collect());
        }
    }

    Ok(records)
}
