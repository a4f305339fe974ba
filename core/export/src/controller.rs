//! Export controller: one attempt of one export job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use healthsync_common::{DataTag, Error, HealthData, Result};
use healthsync_storage::RemoteAdapters;

use crate::report::{ExportFormat, ExportReport};
use crate::spreadsheet::SpreadsheetExporter;
use crate::table::DailyTable;
use crate::tabular::TabularExporter;

/// Which document formats are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportFormats {
    pub csv: bool,
    pub spreadsheet: bool,
}

impl Default for ExportFormats {
    fn default() -> Self {
        Self {
            csv: true,
            spreadsheet: true,
        }
    }
}

impl ExportFormats {
    /// Enabled formats in the order they are written.
    pub fn enabled(&self) -> Vec<ExportFormat> {
        let mut formats = Vec::new();
        if self.csv {
            formats.push(ExportFormat::Csv);
        }
        if self.spreadsheet {
            formats.push(ExportFormat::Spreadsheet);
        }
        formats
    }
}

/// Export destination settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportConfig {
    /// Remote folder the documents live in; the account root when unset.
    pub folder_id: Option<String>,
    pub formats: ExportFormats,
    /// Fetch a PDF rendering of each written spreadsheet.
    pub include_pdf: bool,
}

/// Data for one export attempt.
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub health_data: &'a HealthData,
    pub selected_tags: &'a BTreeSet<DataTag>,
    /// Restricts the export to these date keys when set.
    pub sync_date_range: Option<&'a BTreeSet<String>>,
}

/// Dispatches an export to every enabled format.
pub struct ExportController {
    adapters: Arc<dyn RemoteAdapters>,
    config: ExportConfig,
}

impl ExportController {
    pub fn new(adapters: Arc<dyn RemoteAdapters>, config: ExportConfig) -> Self {
        Self { adapters, config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run one export attempt.
    ///
    /// Credentials are refreshed once, then every enabled format is written
    /// even if an earlier one fails. The attempt succeeds only if all of them
    /// succeed.
    ///
    /// # Errors
    /// - `Validation` when no format is enabled or no record matches the filters
    /// - the connect error when credentials cannot be refreshed
    /// - the combined exporter failures otherwise
    pub async fn export(&self, request: ExportRequest<'_>) -> Result<ExportReport> {
        let formats = self.config.formats.enabled();
        if formats.is_empty() {
            return Err(Error::Validation("No export format is enabled".to_string()));
        }

        let data = request
            .health_data
            .filter(request.selected_tags, request.sync_date_range);
        if data.is_empty() {
            return Err(Error::Validation(
                "No health records matched the selected data types and dates".to_string(),
            ));
        }

        let table = DailyTable::from_health_data(&data);
        debug!(
            records = data.record_count(),
            days = table.len(),
            "Prepared export table"
        );

        let session = self.adapters.connect().await?;
        let folder_id = self.config.folder_id.as_deref();

        let mut report = ExportReport {
            records: data.record_count(),
            ..Default::default()
        };
        let mut failures: Vec<(ExportFormat, Error)> = Vec::new();

        for format in formats {
            let outcome = match format {
                ExportFormat::Csv => TabularExporter::new(session.files.as_ref(), folder_id)
                    .export(&table)
                    .await
                    .map(|writes| (writes, Vec::new())),
                ExportFormat::Spreadsheet => {
                    SpreadsheetExporter::new(session.sheets.as_ref(), folder_id)
                        .export(&table, self.config.include_pdf)
                        .await
                        .map(|export| (export.writes, export.pdfs))
                }
            };

            match outcome {
                Ok((writes, pdfs)) => {
                    report.documents.extend(writes);
                    report.pdfs.extend(pdfs);
                }
                Err(e) => {
                    warn!(%format, "Export failed: {}", e);
                    failures.push((format, e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(combine_failures(failures));
        }

        info!(
            records = report.records,
            documents = report.documents.len(),
            "Export completed"
        );
        Ok(report)
    }
}

/// Fold per-format failures into one error for the job.
///
/// A single failure is returned unchanged. Several failures share one
/// message; the result is a network error when all of them are, keeps the
/// kind of the first permanent failure when there is one, and is a retryable
/// `EXPORT_FAILED` storage error otherwise.
fn combine_failures(mut failures: Vec<(ExportFormat, Error)>) -> Error {
    if failures.len() == 1 {
        let (_, error) = failures.remove(0);
        return error;
    }

    let message = failures
        .iter()
        .map(|(format, e)| format!("{}: {}", format, e))
        .collect::<Vec<_>>()
        .join("; ");

    if failures.iter().all(|(_, e)| matches!(e, Error::Network(_))) {
        return Error::Network(message);
    }

    match failures.into_iter().map(|(_, e)| e).find(|e| !e.is_retryable()) {
        Some(Error::Storage { code, .. }) => Error::storage(code, message),
        Some(Error::Validation(_)) => Error::Validation(message),
        Some(Error::NotFound(_)) => Error::NotFound(message),
        Some(Error::InvalidInput(_)) => Error::InvalidInput(message),
        Some(Error::Serialization(_)) => Error::Serialization(message),
        _ => Error::storage("EXPORT_FAILED", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync_common::error::AUTH_REVOKED_CODE;
    use healthsync_common::parse_date_key;
    use healthsync_common::types::{StepsRecord, WeightRecord};
    use healthsync_storage::MemoryAdapters;

    fn sample_data() -> HealthData {
        HealthData {
            steps: vec![
                StepsRecord {
                    date: parse_date_key("2025-01-01").unwrap(),
                    count: 1000,
                },
                StepsRecord {
                    date: parse_date_key("2025-01-02").unwrap(),
                    count: 2000,
                },
            ],
            weight: vec![WeightRecord {
                date: parse_date_key("2025-01-01").unwrap(),
                kilograms: 70.0,
            }],
            ..Default::default()
        }
    }

    fn tags(list: &[DataTag]) -> BTreeSet<DataTag> {
        list.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_exports_all_enabled_formats() {
        let adapters = Arc::new(MemoryAdapters::new());
        let controller = ExportController::new(adapters.clone(), ExportConfig::default());
        let data = sample_data();
        let selected = tags(&[DataTag::Steps]);

        let report = controller
            .export(ExportRequest {
                health_data: &data,
                selected_tags: &selected,
                sync_date_range: None,
            })
            .await
            .unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.documents_for(ExportFormat::Csv).count(), 1);
        assert_eq!(report.documents_for(ExportFormat::Spreadsheet).count(), 1);
        assert_eq!(adapters.connect_count(), 1);
        assert_eq!(
            adapters
                .files()
                .content_by_name("health_data_2025.csv")
                .await
                .unwrap(),
            "Date,Day,Steps\n2025-01-01,Wed,1000\n2025-01-02,Thu,2000\n"
        );
    }

    #[tokio::test]
    async fn test_date_range_restricts_rows() {
        let adapters = Arc::new(MemoryAdapters::new());
        let controller = ExportController::new(adapters.clone(), ExportConfig::default());
        let data = sample_data();
        let selected = tags(&[DataTag::Steps]);
        let dates: BTreeSet<String> = ["2025-01-02".to_string()].into_iter().collect();

        controller
            .export(ExportRequest {
                health_data: &data,
                selected_tags: &selected,
                sync_date_range: Some(&dates),
            })
            .await
            .unwrap();

        assert_eq!(
            adapters
                .files()
                .content_by_name("health_data_2025.csv")
                .await
                .unwrap(),
            "Date,Day,Steps\n2025-01-02,Thu,2000\n"
        );
    }

    #[tokio::test]
    async fn test_nothing_to_export_is_validation() {
        let adapters = Arc::new(MemoryAdapters::new());
        let controller = ExportController::new(adapters.clone(), ExportConfig::default());
        let data = sample_data();
        let selected = tags(&[DataTag::Sleep]);

        let err = controller
            .export(ExportRequest {
                health_data: &data,
                selected_tags: &selected,
                sync_date_range: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(adapters.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_no_enabled_format_is_validation() {
        let config = ExportConfig {
            formats: ExportFormats {
                csv: false,
                spreadsheet: false,
            },
            ..Default::default()
        };
        let controller = ExportController::new(Arc::new(MemoryAdapters::new()), config);
        let data = sample_data();
        let selected = tags(&[DataTag::Steps]);

        let err = controller
            .export(ExportRequest {
                health_data: &data,
                selected_tags: &selected,
                sync_date_range: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_one_failing_format_fails_attempt() {
        let adapters = Arc::new(MemoryAdapters::new());
        adapters.sheets().fail_with_network("sheets down").await;
        let controller = ExportController::new(adapters.clone(), ExportConfig::default());
        let data = sample_data();
        let selected = tags(&[DataTag::Steps]);

        let err = controller
            .export(ExportRequest {
                health_data: &data,
                selected_tags: &selected,
                sync_date_range: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network(_)));
        // CSV was still written
        assert_eq!(adapters.files().file_count().await, 1);
    }

    #[tokio::test]
    async fn test_revoked_credentials_fail_before_export() {
        let adapters = Arc::new(MemoryAdapters::new());
        adapters.fail_connect(AUTH_REVOKED_CODE).await;
        let controller = ExportController::new(adapters.clone(), ExportConfig::default());
        let data = sample_data();
        let selected = tags(&[DataTag::Steps]);

        let err = controller
            .export(ExportRequest {
                health_data: &data,
                selected_tags: &selected,
                sync_date_range: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(AUTH_REVOKED_CODE));
        assert_eq!(adapters.files().file_count().await, 0);
    }

    #[test]
    fn test_combine_failures() {
        let all_network = combine_failures(vec![
            (ExportFormat::Csv, Error::Network("a".to_string())),
            (ExportFormat::Spreadsheet, Error::Network("b".to_string())),
        ]);
        assert!(
            matches!(all_network, Error::Network(ref m) if m.contains("CSV") && m.contains("; "))
        );

        let permanent = combine_failures(vec![
            (ExportFormat::Csv, Error::Network("a".to_string())),
            (
                ExportFormat::Spreadsheet,
                Error::storage(AUTH_REVOKED_CODE, "revoked"),
            ),
        ]);
        assert_eq!(permanent.code(), Some(AUTH_REVOKED_CODE));

        let mixed = combine_failures(vec![
            (ExportFormat::Csv, Error::Network("a".to_string())),
            (ExportFormat::Spreadsheet, Error::storage("HTTP_500", "boom")),
        ]);
        assert_eq!(mixed.code(), Some("EXPORT_FAILED"));
        assert!(mixed.is_retryable());
    }
}
