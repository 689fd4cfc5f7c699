//! Feature tables and their CSV artifact.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Identifying columns written before the feature columns.
pub const ID_COLUMNS: [&str; 3] = ["participant_id", "window_start_time", "window_end_time"];

/// Column holding the representative sleep stage.
pub const STAGE_COLUMN: &str = "sleep_stage";

/// Errors while persisting a feature table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write error for {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Features of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub window_index: usize,
    pub window_start_time: f64,
    pub window_end_time: f64,
    /// Mode of the window's labels; `None` when the series is unlabelled
    pub sleep_stage: Option<String>,
    /// One value per feature column, NaN where the feature is missing
    pub values: Vec<f64>,
}

/// All windows of one subject.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureTable {
    participant_id: String,
    columns: Vec<String>,
    labelled: bool,
    rows: Vec<FeatureRow>,
    feature_failures: usize,
}

impl FeatureTable {
    /// Create an empty table with a fixed feature column set.
    pub fn new(participant_id: impl Into<String>, columns: Vec<String>, labelled: bool) -> Self {
        Self {
            participant_id: participant_id.into(),
            columns,
            labelled,
            rows: Vec::new(),
            feature_failures: 0,
        }
    }

    /// Append a row; its values must line up with [`FeatureTable::columns`].
    pub fn push(&mut self, row: FeatureRow) {
        debug_assert_eq!(row.values.len(), self.columns.len());
        self.rows.push(row);
    }

    pub(crate) fn record_feature_failure(&mut self) {
        self.feature_failures += 1;
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Feature column names, in registration order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of (window, function) pairs that fell back to missing values.
    pub fn feature_failures(&self) -> usize {
        self.feature_failures
    }

    /// Value of `column` in row `row`.
    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| r.values[idx])
    }

    /// Full header line of the CSV artifact.
    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = ID_COLUMNS.iter().map(|c| c.to_string()).collect();
        if self.labelled {
            header.push(STAGE_COLUMN.to_string());
        }
        header.extend(self.columns.iter().cloned());
        header
    }

    /// Write the table as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(self.header())?;

        let mut record: Vec<String> = Vec::with_capacity(self.columns.len() + 4);
        for row in &self.rows {
            record.clear();
            record.push(self.participant_id.clone());
            record.push(format_value(row.window_start_time));
            record.push(format_value(row.window_end_time));
            if self.labelled {
                record.push(row.sleep_stage.clone().unwrap_or_default());
            }
            record.extend(row.values.iter().map(|&v| format_value(v)));
            csv.write_record(&record)?;
        }

        csv.flush()?;
        Ok(())
    }

    /// Persist the table at `path`.
    ///
    /// The table is written to a hidden sibling file first and renamed into
    /// place, so `path` only ever exists with complete contents. Every call
    /// uses its own temporary file, so concurrent writers never share one.
    pub fn persist(&self, path: &Path) -> Result<(), TableError> {
        let tmp_path = temp_path(path);
        let io_err = |source| TableError::Io {
            path: tmp_path.clone(),
            source,
        };

        let result = std::fs::File::create(&tmp_path)
            .map_err(io_err)
            .and_then(|file| {
                self.write_csv(std::io::BufWriter::new(file))
                    .map_err(|source| TableError::Csv {
                        path: tmp_path.clone(),
                        source,
                    })
            })
            .and_then(|_| {
                std::fs::rename(&tmp_path, path).map_err(|source| TableError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            });

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }
}

/// Missing values become empty cells; everything else uses the shortest
/// representation that round-trips.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{name}.{}.tmp", &suffix[..8]))
}
