//! Columnar storage for one subject's raw recording.
//!
//! A [`RawSeries`] holds one row per sampling instant: a timestamp, the
//! physiological channels and (optionally) the scored sleep stage. Rows are
//! kept in non-decreasing timestamp order; the sampling rate is known from
//! configuration and never inferred from the timestamps.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Label the scorers use for epochs that were not staged.
pub const UNSCORED_LABEL: &str = "P";

/// A physiological signal stream recorded by the wristband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Blood-volume pulse
    Bvp,
    /// Inter-beat interval (seconds)
    Ibi,
    /// Accelerometer, x axis
    AccX,
    /// Accelerometer, y axis
    AccY,
    /// Accelerometer, z axis
    AccZ,
    /// Electrodermal activity
    Eda,
    /// Skin temperature
    Temp,
    /// Heart rate
    Hr,
}

impl Channel {
    /// Every channel, in input column order.
    pub const ALL: [Channel; 8] = [
        Channel::Bvp,
        Channel::Ibi,
        Channel::AccX,
        Channel::AccY,
        Channel::AccZ,
        Channel::Eda,
        Channel::Temp,
        Channel::Hr,
    ];

    /// Column header used for this channel in subject files.
    pub fn column(self) -> &'static str {
        match self {
            Channel::Bvp => "BVP",
            Channel::Ibi => "IBI",
            Channel::AccX => "ACC_X",
            Channel::AccY => "ACC_Y",
            Channel::AccZ => "ACC_Z",
            Channel::Eda => "EDA",
            Channel::Temp => "TEMP",
            Channel::Hr => "HR",
        }
    }

    /// Look up a channel by its column header.
    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.column() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Structural problems with a series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("column {column} has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("timestamp at row {row} is out of order ({previous} then {current})")]
    UnorderedTimestamps {
        row: usize,
        previous: f64,
        current: f64,
    },
}

/// One subject's samples, stored column-wise.
#[derive(Debug, Clone, Default)]
pub struct RawSeries {
    timestamps: Vec<f64>,
    channels: BTreeMap<Channel, Vec<f64>>,
    labels: Option<Vec<String>>,
}

impl RawSeries {
    /// Create a series from its timestamp column.
    ///
    /// Timestamps are opaque to the engine: they are only compared for
    /// ordering and copied into the output as window bounds.
    pub fn new(timestamps: Vec<f64>) -> Result<Self, SeriesError> {
        for (row, pair) in timestamps.windows(2).enumerate() {
            // NaN has no ordering and is rejected as well
            if !matches!(
                pair[0].partial_cmp(&pair[1]),
                Some(Ordering::Less | Ordering::Equal)
            ) {
                return Err(SeriesError::UnorderedTimestamps {
                    row: row + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }

        Ok(Self {
            timestamps,
            channels: BTreeMap::new(),
            labels: None,
        })
    }

    /// Attach a channel column.
    pub fn with_channel(mut self, channel: Channel, values: Vec<f64>) -> Result<Self, SeriesError> {
        self.check_len(channel.column(), values.len())?;
        self.channels.insert(channel, values);
        Ok(self)
    }

    /// Attach the sleep-stage label column.
    pub fn with_labels(mut self, labels: Vec<String>) -> Result<Self, SeriesError> {
        self.check_len("Sleep_Stage", labels.len())?;
        self.labels = Some(labels);
        Ok(self)
    }

    fn check_len(&self, column: &str, actual: usize) -> Result<(), SeriesError> {
        if actual != self.timestamps.len() {
            return Err(SeriesError::LengthMismatch {
                column: column.to_string(),
                expected: self.timestamps.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Remove every row whose label equals `label`.
    ///
    /// Series without a label column are left untouched.
    pub fn exclude_label(&mut self, label: &str) -> usize {
        let keep: Vec<bool> = match &self.labels {
            Some(labels) => labels.iter().map(|l| l != label).collect(),
            None => return 0,
        };
        let removed = keep.iter().filter(|&&k| !k).count();
        if removed == 0 {
            return 0;
        }

        retain_by_mask(&mut self.timestamps, &keep);
        for values in self.channels.values_mut() {
            retain_by_mask(values, &keep);
        }
        if let Some(labels) = self.labels.as_mut() {
            retain_by_mask(labels, &keep);
        }
        removed
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Check if the series has no rows.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Samples of one channel, if the series carries it.
    pub fn channel(&self, channel: Channel) -> Option<&[f64]> {
        self.channels.get(&channel).map(Vec::as_slice)
    }

    /// Channels present in this series.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn has_labels(&self) -> bool {
        self.labels.is_some()
    }
}

fn retain_by_mask<T>(values: &mut Vec<T>, keep: &[bool]) {
    let mut flags = keep.iter();
    values.retain(|_| *flags.next().unwrap_or(&false));
}
