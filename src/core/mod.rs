//! Core functionality for Synheart Sleep Features.
//!
//! This module contains:
//! - Columnar subject series and the channels they carry
//! - Window partitioning and representative sleep-stage labels
//! - The per-channel feature library
//! - The extraction engine and the feature tables it produces

pub mod engine;
pub mod features;
pub mod series;
pub mod stats;
pub mod table;
pub mod windowing;

// Re-export commonly used types
pub use engine::{
    BatchError, BatchJob, BatchReport, FeatureEngine, FeatureRegistry, SubjectOutcome,
    SubjectState, SubjectStatus, MISSING_VALUE,
};
pub use features::{
    default_feature_functions, ChannelFeatures, FeatureError, FeatureFunction, FeatureSet,
};
pub use series::{Channel, RawSeries, SeriesError, UNSCORED_LABEL};
pub use table::{FeatureRow, FeatureTable, TableError};
pub use windowing::{representative_label, window_count, Window, Windows};
