//! Loading of subject recordings from CSV.
//!
//! Subject files carry one row per sample with a `TIMESTAMP` column, one
//! column per channel and an optional `Sleep_Stage` column. Event annotation
//! columns and any other unknown column are ignored, and rows scored as
//! unscored are dropped before the series is handed to the engine.

use crate::core::series::{Channel, RawSeries, SeriesError, UNSCORED_LABEL};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const TIMESTAMP_COLUMN: &str = "TIMESTAMP";
pub const LABEL_COLUMN: &str = "Sleep_Stage";

/// Sparse event annotations that never reach the feature functions.
pub const ANNOTATION_COLUMNS: [&str; 4] = [
    "Obstructive_Apnea",
    "Central_Apnea",
    "Hypopnea",
    "Multiple_Events",
];

/// Errors while loading a subject file. Fatal for that subject only.
#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV parse error at line {line} in {path}: {source}")]
    Csv {
        path: PathBuf,
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("{path} is missing required column {column}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("invalid {column} value {value:?} at line {line} in {path}")]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },

    #[error("malformed series in {path}: {source}")]
    Series {
        path: PathBuf,
        #[source]
        source: SeriesError,
    },
}

/// Column positions resolved from a header row.
struct Layout {
    timestamp: usize,
    channels: Vec<(Channel, usize)>,
    label: Option<usize>,
}

impl Layout {
    fn resolve(path: &Path, headers: &csv::StringRecord) -> Result<Self, DataLoadError> {
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);
        let missing = |column: &str| DataLoadError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        };

        let timestamp = position(TIMESTAMP_COLUMN).ok_or_else(|| missing(TIMESTAMP_COLUMN))?;
        let channels = Channel::ALL
            .into_iter()
            .map(|c| {
                position(c.column())
                    .map(|idx| (c, idx))
                    .ok_or_else(|| missing(c.column()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dropped: Vec<&str> = headers
            .iter()
            .filter(|h| ANNOTATION_COLUMNS.contains(&h.trim()))
            .collect();
        if !dropped.is_empty() {
            debug!(path = %path.display(), ?dropped, "dropping annotation columns");
        }

        Ok(Self {
            timestamp,
            channels,
            label: position(LABEL_COLUMN),
        })
    }
}

/// Read one subject's series from `path`.
pub fn load_subject_series(path: &Path) -> Result<RawSeries, DataLoadError> {
    let file = std::fs::File::open(path).map_err(|source| DataLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_subject_series(path, file)
}

/// Read a subject series from any reader; `path` is only used for errors.
pub fn read_subject_series<R: std::io::Read>(
    path: &Path,
    reader: R,
) -> Result<RawSeries, DataLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|source| DataLoadError::Csv {
            path: path.to_path_buf(),
            line: 1,
            source,
        })?
        .clone();
    let layout = Layout::resolve(path, &headers)?;

    let mut timestamps = Vec::new();
    let mut channels: Vec<Vec<f64>> = vec![Vec::new(); layout.channels.len()];
    let mut labels = layout.label.map(|_| Vec::new());
    let mut skipped = 0usize;

    let mut record = csv::StringRecord::new();
    loop {
        let line = reader.position().line();
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(source) => {
                return Err(DataLoadError::Csv {
                    path: path.to_path_buf(),
                    line,
                    source,
                })
            }
        }

        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        if let (Some(idx), Some(labels)) = (layout.label, labels.as_mut()) {
            let label = field(idx);
            if label == UNSCORED_LABEL {
                skipped += 1;
                continue;
            }
            labels.push(label.to_string());
        }

        let raw_ts = field(layout.timestamp);
        let ts = raw_ts
            .parse::<f64>()
            .map_err(|_| invalid(path, line, TIMESTAMP_COLUMN, raw_ts))?;
        timestamps.push(ts);

        for ((channel, idx), values) in layout.channels.iter().zip(channels.iter_mut()) {
            let raw = field(*idx);
            values.push(parse_sample(raw).ok_or_else(|| invalid(path, line, channel.column(), raw))?);
        }
    }

    debug!(
        path = %path.display(),
        rows = timestamps.len(),
        unscored = skipped,
        "loaded subject series"
    );

    let series_err = |source| DataLoadError::Series {
        path: path.to_path_buf(),
        source,
    };
    let mut series = RawSeries::new(timestamps).map_err(series_err)?;
    for ((channel, _), values) in layout.channels.iter().zip(channels) {
        series = series.with_channel(*channel, values).map_err(series_err)?;
    }
    if let Some(labels) = labels {
        series = series.with_labels(labels).map_err(series_err)?;
    }
    Ok(series)
}

/// Empty cells are missing samples and load as NaN.
fn parse_sample(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return Some(f64::NAN);
    }
    raw.parse().ok()
}

fn invalid(path: &Path, line: u64, column: &str, value: &str) -> DataLoadError {
    DataLoadError::InvalidValue {
        path: path.to_path_buf(),
        line,
        column: column.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "TIMESTAMP,BVP,ACC_X,ACC_Y,ACC_Z,TEMP,EDA,HR,IBI,Sleep_Stage,Obstructive_Apnea,Central_Apnea,Hypopnea,Multiple_Events";

    fn read(csv: &str) -> Result<RawSeries, DataLoadError> {
        read_subject_series(Path::new("S002_whole_df.csv"), csv.as_bytes())
    }

    #[test]
    fn test_loads_channels_and_filters_unscored() {
        let csv = format!(
            "{HEADER}\n\
             0.0,1.5,10,20,30,33.1,0.2,60,0.8,P,,,,\n\
             0.015625,1.6,11,21,31,33.1,0.2,61,0.8,W,,,,\n\
             0.03125,1.7,12,22,32,33.2,0.3,62,0.9,N1,1,,,\n"
        );
        let series = read(&csv).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.timestamps(), &[0.015625, 0.03125]);
        assert_eq!(series.channel(Channel::Bvp), Some(&[1.6, 1.7][..]));
        assert_eq!(series.channel(Channel::AccZ), Some(&[31.0, 32.0][..]));
        assert_eq!(series.channel(Channel::Ibi), Some(&[0.8, 0.9][..]));
        assert_eq!(series.labels().unwrap(), &["W".to_string(), "N1".to_string()]);
    }

    #[test]
    fn test_empty_cells_load_as_nan() {
        let csv = format!("{HEADER}\n0.0,1.5,10,20,30,33.1,0.2,60,,W,,,,\n");
        let series = read(&csv).unwrap();
        assert!(series.channel(Channel::Ibi).unwrap()[0].is_nan());
    }

    #[test]
    fn test_label_column_is_optional() {
        let csv = "TIMESTAMP,BVP,ACC_X,ACC_Y,ACC_Z,TEMP,EDA,HR,IBI\n0,1,1,1,1,33,0.1,60,0.8\n";
        let series = read(csv).unwrap();
        assert!(!series.has_labels());
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_missing_channel_column() {
        let csv = "TIMESTAMP,BVP,ACC_X,ACC_Y,ACC_Z,TEMP,EDA,IBI,Sleep_Stage\n";
        let err = read(csv).unwrap_err();
        assert!(matches!(err, DataLoadError::MissingColumn { ref column, .. } if column == "HR"));
    }

    #[test]
    fn test_invalid_value_reports_line() {
        let csv = format!("{HEADER}\n0.0,1.5,10,20,30,33.1,0.2,60,0.8,W,,,,\n0.1,abc,10,20,30,33.1,0.2,60,0.8,W,,,,\n");
        let err = read(&csv).unwrap_err();
        match err {
            DataLoadError::InvalidValue { line, column, value, .. } => {
                assert_eq!(line, 3);
                assert_eq!(column, "BVP");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unordered_timestamps_rejected() {
        let csv = format!(
            "{HEADER}\n1.0,1,1,1,1,33,0.1,60,0.8,W,,,,\n0.5,1,1,1,1,33,0.1,60,0.8,W,,,,\n"
        );
        assert!(matches!(read(&csv), Err(DataLoadError::Series { .. })));
    }

    #[test]
    fn test_missing_file() {
        let err = load_subject_series(Path::new("/nonexistent/S999_whole_df.csv")).unwrap_err();
        assert!(matches!(err, DataLoadError::Io { .. }));
    }
}
