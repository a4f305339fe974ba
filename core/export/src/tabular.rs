//! Per-year comma-separated documents in the remote folder.

use tracing::{debug, info};

use healthsync_common::{Error, Result};
use healthsync_storage::{FileOperations, CSV_MIME_TYPE};

use crate::delimited::{encode_document, parse_document};
use crate::merge::merge;
use crate::report::{DocumentWrite, ExportFormat, WriteAction};
use crate::table::DailyTable;

/// Name of the document holding one calendar year.
pub fn document_name(year: i32) -> String {
    format!("health_data_{}.csv", year)
}

/// Writes daily tables into per-year CSV documents, merging with what is stored.
pub struct TabularExporter<'a> {
    files: &'a dyn FileOperations,
    folder_id: Option<&'a str>,
}

impl<'a> TabularExporter<'a> {
    pub fn new(files: &'a dyn FileOperations, folder_id: Option<&'a str>) -> Self {
        Self { files, folder_id }
    }

    /// Export every year present in `table`.
    ///
    /// # Postconditions
    /// - Each year document holds the union of its stored dates and the
    ///   incoming dates, with incoming values winning.
    /// - Repeating the same export leaves the documents byte-identical.
    ///
    /// # Errors
    /// Stops at the first year that fails and returns its error. Years written
    /// before the failure stay written; repeating the export is harmless.
    pub async fn export(&self, table: &DailyTable) -> Result<Vec<DocumentWrite>> {
        let mut writes = Vec::new();
        for (year, year_table) in table.split_by_year() {
            writes.push(self.export_year(year, &year_table).await?);
        }
        Ok(writes)
    }

    async fn export_year(&self, year: i32, table: &DailyTable) -> Result<DocumentWrite> {
        let name = document_name(year);

        let existing = self
            .files
            .find_file(&name, CSV_MIME_TYPE, self.folder_id)
            .await?;

        let Some(file) = existing else {
            let merged = merge(&[], &[], table)?;
            let content = encode_document(&merged.header, &merged.rows)?;
            let id = self
                .files
                .upload_file(&content, &name, CSV_MIME_TYPE, self.folder_id)
                .await?;
            info!(document = %name, rows = merged.rows.len(), "Created CSV document");
            return Ok(DocumentWrite {
                format: ExportFormat::Csv,
                year,
                name,
                document_id: id,
                action: WriteAction::Created,
                rows: merged.rows.len(),
            });
        };

        let stored = self.files.download_file_content(&file.id).await?;
        let mut records = parse_document(&stored)?.into_iter();
        let header = records.next().unwrap_or_default();
        let rows: Vec<Vec<String>> = records.collect();
        debug!(document = %name, stored_rows = rows.len(), "Merging into CSV document");

        let merged = merge(&header, &rows, table)?;
        let content = encode_document(&merged.header, &merged.rows)?;
        if !self
            .files
            .update_file(&file.id, &content, CSV_MIME_TYPE)
            .await?
        {
            return Err(Error::storage(
                "UPDATE_REJECTED",
                format!("Update of {} was not accepted", name),
            ));
        }

        info!(document = %name, rows = merged.rows.len(), "Updated CSV document");
        Ok(DocumentWrite {
            format: ExportFormat::Csv,
            year,
            name,
            document_id: file.id,
            action: WriteAction::Updated,
            rows: merged.rows.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync_common::parse_date_key;
    use healthsync_common::types::{HealthData, StepsRecord, WeightRecord};
    use healthsync_storage::{MemoryFileStore, RemoteCall};

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

    #[tokio::test]
    async fn test_creates_document_when_missing() {
        let store = MemoryFileStore::new();
        let exporter = TabularExporter::new(&store, None);

        let writes = exporter.export(&steps(&[("2025-01-01", 1000)])).await.unwrap();

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].action, WriteAction::Created);
        assert_eq!(
            store.content_by_name("health_data_2025.csv").await.unwrap(),
            "Date,Day,Steps\n2025-01-01,Wed,1000\n"
        );
    }

    #[tokio::test]
    async fn test_merges_into_existing_document() {
        let store = MemoryFileStore::new();
        store
            .insert_file(
                "health_data_2025.csv",
                CSV_MIME_TYPE,
                "Date,Day,Weight (kg)\r\n2025-01-01,Wed,70\r\n2025-01-02,Thu,71\r\n",
            )
            .await;
        let exporter = TabularExporter::new(&store, None);

        let writes = exporter.export(&steps(&[("2025-01-02", 500)])).await.unwrap();

        assert_eq!(writes[0].action, WriteAction::Updated);
        assert_eq!(writes[0].rows, 2);
        assert_eq!(
            store.content_by_name("health_data_2025.csv").await.unwrap(),
            "Date,Day,Weight (kg),Steps\n2025-01-01,Wed,70,\n2025-01-02,Thu,,500\n"
        );
    }

    #[tokio::test]
    async fn test_repeated_export_is_byte_identical() {
        let store = MemoryFileStore::new();
        let exporter = TabularExporter::new(&store, None);
        let table = DailyTable::from_health_data(&HealthData {
            weight: vec![WeightRecord {
                date: parse_date_key("2025-03-01").unwrap(),
                kilograms: 70.25,
            }],
            ..Default::default()
        });

        exporter.export(&table).await.unwrap();
        let first = store.content_by_name("health_data_2025.csv").await.unwrap();
        exporter.export(&table).await.unwrap();
        let second = store.content_by_name("health_data_2025.csv").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.file_count().await, 1);
    }

    #[tokio::test]
    async fn test_one_document_per_year() {
        let store = MemoryFileStore::new();
        let exporter = TabularExporter::new(&store, None);

        let writes = exporter
            .export(&steps(&[("2024-12-31", 1), ("2025-01-01", 2)]))
            .await
            .unwrap();

        let names: Vec<&str> = writes.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["health_data_2024.csv", "health_data_2025.csv"]);
    }

    #[tokio::test]
    async fn test_network_failure_propagates() {
        let store = MemoryFileStore::new();
        store.fail_with_network("offline").await;
        let exporter = TabularExporter::new(&store, None);

        let err = exporter.export(&steps(&[("2025-01-01", 1)])).await.unwrap_err();

        assert!(matches!(err, Error::Network(_)));
        assert_eq!(
            store.calls().await,
            vec![RemoteCall::FindFile {
                name: "health_data_2025.csv".to_string()
            }]
        );
    }
}
