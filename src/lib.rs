//! Synheart Sleep Features - windowed feature extraction for sleep staging.
//!
//! This library turns high-frequency wristband recordings (BVP, IBI,
//! accelerometer, EDA, skin temperature, heart rate and a scored sleep stage)
//! into one feature row per fixed-length window, ready for a sleep-stage
//! classifier.
//!
//! # Guarantees
//!
//! - **Exact row count**: a subject of `n` samples yields `n / window_size` rows
//! - **No lost windows**: a failing feature function yields missing values, not a missing row
//! - **No partial outputs**: tables are written to a temporary file and renamed
//! - **Idempotent runs**: subjects with an existing table are skipped
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Synheart Sleep Features                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Ingest    │──▶│  Windowing  │──▶│  Features   │       │
//! │  │   (CSV)     │   │ (30s bins)  │   │ (registry)  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         ▲                                    │              │
//! │         │                                    ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │  Discovery  │                     │   Feature   │       │
//! │  │  + Ledger   │                     │    Table    │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use synheart_sleep_features::{FeatureEngine, config::window_size};
//!
//! let engine = FeatureEngine::with_default_features()?;
//! let series = engine.load_subject_series(Path::new("data/S002_whole_df.csv"))?;
//! let table = engine.process_subject("S002", &series, window_size(64, 30.0)?)?;
//! table.persist(Path::new("out/S002_processed.csv"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod core;
pub mod discovery;
pub mod ingest;
pub mod ledger;

#[cfg(feature = "download")]
pub mod download;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    BatchJob, BatchReport, Channel, FeatureEngine, FeatureError, FeatureFunction,
    FeatureRegistry, FeatureSet, FeatureTable, RawSeries, SubjectStatus,
};
pub use ingest::{load_subject_series, DataLoadError};
pub use ledger::{RunLedger, RunStats};

// Download re-exports (when enabled)
#[cfg(feature = "download")]
pub use download::{DownloadConfig, DownloadError, DownloadOutcome, PhysioNetClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
