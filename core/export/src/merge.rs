//! Date-keyed merge of incoming daily rows into an existing document.
//!
//! Both document formats go through the same merge so that they agree on
//! column order, row order and conflict resolution:
//!
//! - Existing columns keep their order; columns only the incoming rows carry
//!   are appended in canonical order.
//! - Rows are keyed by their Date cell. An incoming row replaces the stored
//!   row for the same date wholesale; stored rows for other dates are kept.
//! - Output rows are sorted ascending by date, and the Day cell is always
//!   recomputed from the date.

use std::collections::BTreeMap;
use tracing::warn;

use healthsync_common::{Error, Result};

use crate::delimited::MALFORMED_DOCUMENT_CODE;
use crate::table::{header_for, render_row, DailyTable, RowValues, DATE_COLUMN, DAY_COLUMN};

/// Result of merging incoming rows into a document.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    /// Header row, starting with Date and Day.
    pub header: Vec<String>,
    /// Data rows, ascending by date.
    pub rows: Vec<Vec<String>>,
    /// Whether `header` differs from the stored header.
    pub header_changed: bool,
}

/// Merge `incoming` into a stored document.
///
/// An empty `existing_header` means the document has no content yet.
///
/// # Errors
/// Returns `MALFORMED_DOCUMENT` when the stored header has no Date column.
pub fn merge(
    existing_header: &[String],
    existing_rows: &[Vec<String>],
    incoming: &DailyTable,
) -> Result<MergedTable> {
    let stored_header: Vec<&str> = existing_header.iter().map(|h| h.trim()).collect();
    let has_header = stored_header.iter().any(|h| !h.is_empty());

    let mut columns: Vec<String> = Vec::new();
    let mut by_date: BTreeMap<String, RowValues> = BTreeMap::new();

    if has_header {
        let date_index = stored_header
            .iter()
            .position(|h| *h == DATE_COLUMN)
            .ok_or_else(|| {
                Error::storage(
                    MALFORMED_DOCUMENT_CODE,
                    format!("Stored header has no {} column", DATE_COLUMN),
                )
            })?;

        for name in &stored_header {
            if !name.is_empty()
                && *name != DATE_COLUMN
                && *name != DAY_COLUMN
                && !columns.iter().any(|c| c.as_str() == *name)
            {
                columns.push(name.to_string());
            }
        }

        for row in existing_rows {
            let key = row.get(date_index).map(|k| k.trim()).unwrap_or_default();
            if key.is_empty() {
                continue;
            }
            let values: RowValues = stored_header
                .iter()
                .enumerate()
                .filter(|(i, name)| *i != date_index && **name != DAY_COLUMN && !name.is_empty())
                .filter_map(|(i, name)| {
                    row.get(i)
                        .filter(|cell| !cell.is_empty())
                        .map(|cell| (name.to_string(), cell.clone()))
                })
                .collect();
            by_date.insert(key.to_string(), values);
        }
    } else if !existing_rows.is_empty() {
        warn!(
            rows = existing_rows.len(),
            "Stored document has rows but no header; rebuilding it"
        );
    }

    for column in incoming.columns() {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }

    for (key, values) in incoming.keyed_rows() {
        by_date.insert(key, values.clone());
    }

    let header = header_for(&columns);
    let header_changed = header != existing_header;
    let rows = by_date
        .iter()
        .map(|(key, values)| render_row(key, values, &columns))
        .collect();

    Ok(MergedTable {
        header,
        rows,
        header_changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync_common::parse_date_key;
    use healthsync_common::types::{HealthData, StepsRecord, WeightRecord};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn steps(entries: &[(&str, u64)]) -> DailyTable {
        DailyTable::from_health_data(&HealthData {
            steps: entries
                .iter()
                .map(|(d, count)| StepsRecord {
                    date: parse_date_key(d).unwrap(),
                    count: *count,
                })
                .collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_merge_into_empty_document() {
        let incoming = steps(&[("2025-01-02", 2000), ("2025-01-01", 1000)]);
        let merged = merge(&[], &[], &incoming).unwrap();

        assert_eq!(merged.header, strings(&["Date", "Day", "Steps"]));
        assert_eq!(
            merged.rows,
            vec![
                strings(&["2025-01-01", "Wed", "1000"]),
                strings(&["2025-01-02", "Thu", "2000"]),
            ]
        );
        assert!(merged.header_changed);
    }

    #[test]
    fn test_incoming_row_wins() {
        let header = strings(&["Date", "Day", "Steps"]);
        let stored = vec![strings(&["2025-01-01", "Wed", "1000"])];

        let merged = merge(&header, &stored, &steps(&[("2025-01-01", 1500)])).unwrap();

        assert_eq!(merged.rows, vec![strings(&["2025-01-01", "Wed", "1500"])]);
        assert!(!merged.header_changed);
    }

    #[test]
    fn test_stored_dates_are_kept_and_sorted() {
        let header = strings(&["Date", "Day", "Steps"]);
        let stored = vec![
            strings(&["2025-01-03", "Fri", "3000"]),
            strings(&["2025-01-01", "Wed", "1000"]),
        ];

        let merged = merge(&header, &stored, &steps(&[("2025-01-02", 2000)])).unwrap();

        let dates: Vec<&str> = merged.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(dates, vec!["2025-01-01", "2025-01-02", "2025-01-03"]);
    }

    #[test]
    fn test_new_columns_are_appended() {
        let header = strings(&["Date", "Day", "Weight (kg)"]);
        let stored = vec![strings(&["2025-01-01", "Wed", "70"])];
        let incoming = DailyTable::from_health_data(&HealthData {
            steps: vec![StepsRecord {
                date: parse_date_key("2025-01-02").unwrap(),
                count: 100,
            }],
            weight: vec![WeightRecord {
                date: parse_date_key("2025-01-02").unwrap(),
                kilograms: 71.0,
            }],
            ..Default::default()
        });

        let merged = merge(&header, &stored, &incoming).unwrap();

        assert_eq!(merged.header, strings(&["Date", "Day", "Weight (kg)", "Steps"]));
        assert_eq!(
            merged.rows,
            vec![
                strings(&["2025-01-01", "Wed", "70", ""]),
                strings(&["2025-01-02", "Thu", "71", "100"]),
            ]
        );
        assert!(merged.header_changed);
    }

    #[test]
    fn test_stale_day_cell_is_recomputed() {
        let header = strings(&["Date", "Day", "Steps"]);
        let stored = vec![strings(&["2025-01-01", "Mon", "1000"])];

        let merged = merge(&header, &stored, &steps(&[("2025-01-05", 1)])).unwrap();

        assert_eq!(merged.rows[0], strings(&["2025-01-01", "Wed", "1000"]));
    }

    #[test]
    fn test_missing_date_column_is_malformed() {
        let header = strings(&["When", "Steps"]);
        let err = merge(&header, &[], &steps(&[("2025-01-01", 1)])).unwrap_err();
        assert_eq!(err.code(), Some(MALFORMED_DOCUMENT_CODE));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let incoming = steps(&[("2025-01-01", 1000), ("2025-01-02", 2000)]);
        let first = merge(&[], &[], &incoming).unwrap();
        let second = merge(&first.header, &first.rows, &incoming).unwrap();

        assert_eq!(first.rows, second.rows);
        assert_eq!(first.header, second.header);
        assert!(!second.header_changed);
    }
}
