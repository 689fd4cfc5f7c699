//! Run ledger for batch processing.
//!
//! Counts what happened to every subject of a run and persists a JSON
//! report next to the outputs, so a batch can be audited after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Counters for one processing run.
///
/// All counters are atomic so worker threads can share one ledger.
#[derive(Debug)]
pub struct RunLedger {
    run_id: Uuid,
    /// Subjects whose table was written
    subjects_processed: AtomicU64,
    /// Subjects skipped because their output already existed
    subjects_skipped: AtomicU64,
    /// Subjects that failed to load or write
    subjects_failed: AtomicU64,
    /// Subjects never started because the run was stopped
    subjects_cancelled: AtomicU64,
    /// Rows written across all tables
    windows_emitted: AtomicU64,
    /// Feature functions that fell back to missing values
    feature_failures: AtomicU64,
    started_at: DateTime<Utc>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            subjects_processed: AtomicU64::new(0),
            subjects_skipped: AtomicU64::new(0),
            subjects_failed: AtomicU64::new(0),
            subjects_cancelled: AtomicU64::new(0),
            windows_emitted: AtomicU64::new(0),
            feature_failures: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record a written table.
    pub fn record_processed(&self, windows: usize, feature_failures: usize) {
        self.subjects_processed.fetch_add(1, Ordering::Relaxed);
        self.windows_emitted
            .fetch_add(windows as u64, Ordering::Relaxed);
        self.feature_failures
            .fetch_add(feature_failures as u64, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.subjects_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.subjects_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.subjects_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            run_id: self.run_id,
            subjects_processed: self.subjects_processed.load(Ordering::Relaxed),
            subjects_skipped: self.subjects_skipped.load(Ordering::Relaxed),
            subjects_failed: self.subjects_failed.load(Ordering::Relaxed),
            subjects_cancelled: self.subjects_cancelled.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            feature_failures: self.feature_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            elapsed_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Run {}:\n\
             - Subjects processed: {}\n\
             - Subjects skipped (already processed): {}\n\
             - Subjects failed: {}\n\
             - Subjects cancelled: {}\n\
             - Windows written: {}\n\
             - Feature failures (filled as missing): {}\n\
             - Elapsed: {:.1} seconds",
            stats.run_id,
            stats.subjects_processed,
            stats.subjects_skipped,
            stats.subjects_failed,
            stats.subjects_cancelled,
            stats.windows_emitted,
            stats.feature_failures,
            stats.elapsed_secs
        )
    }

    /// Write the run report as JSON to `path`.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let report = RunReport {
            stats: self.stats(),
            finished_at: Utc::now(),
            version: crate::VERSION.to_string(),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        std::fs::write(path, json)
    }

    /// Default report file name for this run.
    pub fn report_file_name(&self) -> String {
        format!(
            "run_{}_{}.json",
            self.started_at.format("%Y%m%d_%H%M%S"),
            &self.run_id.to_string()[..8]
        )
    }
}

impl Default for RunLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the ledger counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub subjects_processed: u64,
    pub subjects_skipped: u64,
    pub subjects_failed: u64,
    pub subjects_cancelled: u64,
    pub windows_emitted: u64,
    pub feature_failures: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

/// Report format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub stats: RunStats,
    pub finished_at: DateTime<Utc>,
    pub version: String,
}
