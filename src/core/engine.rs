//! Windowed feature extraction engine.
//!
//! The engine owns an ordered registry of feature functions. For every
//! complete window of a subject series it calls each function in
//! registration order and merges the results into one [`FeatureRow`].
//!
//! A function that fails on a window does not cost the window: its declared
//! features are filled with [`MISSING_VALUE`], the failure is logged with
//! participant, window and function name, and the remaining functions still
//! run. Every subject therefore yields exactly `len / window_size` rows.

use crate::config::{Config, ConfigError};
use crate::core::features::{default_feature_functions, FeatureError, FeatureFunction};
use crate::core::series::RawSeries;
use crate::core::table::{FeatureRow, FeatureTable};
use crate::core::windowing::Window;
use crate::discovery::{discover_subjects, output_path, participant_id};
use crate::ingest::{load_subject_series, DataLoadError};
use crate::ledger::RunLedger;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Value written for features whose function failed on a window.
pub const MISSING_VALUE: f64 = f64::NAN;

struct Registration {
    name: String,
    function: Box<dyn FeatureFunction>,
}

/// Ordered set of named feature functions.
///
/// Once built, the registry is only read, so one engine can be shared by
/// any number of worker threads.
#[derive(Default)]
pub struct FeatureRegistry {
    entries: Vec<Registration>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the standard BVP, IBI, ACC, EDA, TEMP and HR functions.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (name, function) in default_feature_functions() {
            registry.register(name, function)?;
        }
        Ok(registry)
    }

    /// Register `function` under `name`.
    ///
    /// Registering a name that already exists replaces the earlier function
    /// in place (last write wins, position kept). A feature name produced by
    /// a different registered function is a configuration error.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> Result<(), ConfigError>
    where
        F: FeatureFunction + 'static,
    {
        let name = name.into();
        let features = function.feature_names();

        for (i, feature) in features.iter().enumerate() {
            if features[..i].contains(feature) {
                return Err(ConfigError::DuplicateFeature {
                    feature: feature.to_string(),
                    existing: name.clone(),
                    incoming: name,
                });
            }
        }

        for entry in self.entries.iter().filter(|e| e.name != name) {
            let existing = entry.function.feature_names();
            if let Some(feature) = features.iter().find(|f| existing.contains(*f)) {
                return Err(ConfigError::DuplicateFeature {
                    feature: feature.to_string(),
                    existing: entry.name.clone(),
                    incoming: name.clone(),
                });
            }
        }

        let function: Box<dyn FeatureFunction> = Box::new(function);
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.function = function,
            None => self.entries.push(Registration { name, function }),
        }
        Ok(())
    }

    /// Registered function names, in call order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Every feature column, in call order.
    pub fn columns(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|e| e.function.feature_names().iter().map(|f| f.to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Values of one function for one window, in declared order.
fn evaluate(entry: &Registration, window: &Window<'_>) -> Result<Vec<f64>, FeatureError> {
    let declared = entry.function.feature_names();
    let set = entry.function.compute(window)?;

    let values = declared
        .iter()
        .map(|name| {
            set.get(name)
                .ok_or_else(|| FeatureError::MissingFeature(name.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if set.len() != declared.len() {
        if let Some((name, _)) = set.iter().find(|(n, _)| !declared.iter().any(|d| d == n)) {
            return Err(FeatureError::UndeclaredFeature(name.to_string()));
        }
    }
    Ok(values)
}

/// Lifecycle of one subject within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectState {
    Unprocessed,
    Loading,
    Windowing,
    Writing,
    Done,
    Errored,
}

impl fmt::Display for SubjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubjectState::Unprocessed => "unprocessed",
            SubjectState::Loading => "loading",
            SubjectState::Windowing => "windowing",
            SubjectState::Writing => "writing",
            SubjectState::Done => "done",
            SubjectState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// How a subject ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectStatus {
    /// Table written
    Done {
        windows: usize,
        feature_failures: usize,
    },
    /// Output already existed
    Skipped,
    /// Failed in `stage`; nothing was written
    Errored { stage: SubjectState, message: String },
    /// Not started because the run was stopped
    Cancelled,
}

/// Result of one subject in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectOutcome {
    pub participant_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub status: SubjectStatus,
}

/// A discovered subject file.
struct Subject {
    participant_id: String,
    path: PathBuf,
    /// Earlier file that owns this participant id, if any
    shadowed_by: Option<PathBuf>,
}

/// Outcomes of a batch run, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<SubjectOutcome>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&SubjectStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn processed(&self) -> usize {
        self.count(|s| matches!(s, SubjectStatus::Done { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, SubjectStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, SubjectStatus::Errored { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, SubjectStatus::Cancelled))
    }
}

/// Where a batch reads from and writes to.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pattern: String,
    pub window_size: usize,
}

impl BatchJob {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
        window_size: usize,
    ) -> Result<Self, ConfigError> {
        if window_size == 0 {
            return Err(ConfigError::InvalidWindowSize(window_size));
        }
        Ok(Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            pattern: pattern.into(),
            window_size,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(
            &config.input_dir,
            &config.output_dir,
            &config.file_pattern,
            config.window_size()?,
        )
    }
}

/// Errors that stop a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot list subjects in {dir}: {source}")]
    Discovery {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create output directory {dir}: {source}")]
    OutputDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Windowed feature extraction over subject series.
#[derive(Debug)]
pub struct FeatureEngine {
    registry: FeatureRegistry,
}

impl FeatureEngine {
    pub fn new(registry: FeatureRegistry) -> Self {
        Self { registry }
    }

    /// Engine with the standard feature functions registered.
    pub fn with_default_features() -> Result<Self, ConfigError> {
        Ok(Self::new(FeatureRegistry::with_defaults()?))
    }

    /// Register a feature function, see [`FeatureRegistry::register`].
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> Result<(), ConfigError>
    where
        F: FeatureFunction + 'static,
    {
        self.registry.register(name, function)
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Load one subject's series, dropping annotations and unscored rows.
    pub fn load_subject_series(&self, path: &Path) -> Result<RawSeries, DataLoadError> {
        load_subject_series(path)
    }

    /// Compute the feature table of one series.
    ///
    /// Emits exactly `series.len() / window_size` rows regardless of how the
    /// feature functions behave.
    pub fn process_subject(
        &self,
        participant_id: &str,
        series: &RawSeries,
        window_size: usize,
    ) -> Result<FeatureTable, ConfigError> {
        if window_size == 0 {
            return Err(ConfigError::InvalidWindowSize(window_size));
        }

        let columns = self.registry.columns();
        let width = columns.len();
        let mut table = FeatureTable::new(participant_id, columns, series.has_labels());

        for window in series.windows(window_size) {
            let mut values = Vec::with_capacity(width);

            for entry in &self.registry.entries {
                match evaluate(entry, &window) {
                    Ok(computed) => values.extend(computed),
                    Err(e) => {
                        warn!(
                            participant = participant_id,
                            window = window.index(),
                            feature = %entry.name,
                            error = %e,
                            "feature computation failed, filling with missing values"
                        );
                        let declared = entry.function.feature_names().len();
                        values.extend(std::iter::repeat(MISSING_VALUE).take(declared));
                        table.record_feature_failure();
                    }
                }
            }

            table.push(FeatureRow {
                window_index: window.index(),
                window_start_time: window.start_time(),
                window_end_time: window.end_time(),
                sleep_stage: window.representative_label().map(str::to_string),
                values,
            });
        }

        Ok(table)
    }

    /// Process every subject of `job` one after another.
    ///
    /// Subjects whose output already exists are skipped, as are later files
    /// mapping to a participant id already claimed in this run. Setting `stop`
    /// lets the in-flight subject finish and marks the rest as cancelled.
    pub fn process_all_subjects(
        &self,
        job: &BatchJob,
        ledger: &RunLedger,
        stop: &AtomicBool,
    ) -> Result<BatchReport, BatchError> {
        let subjects = self.prepare(job)?;
        let mut report = BatchReport::default();

        for subject in &subjects {
            report.outcomes.push(self.handle(subject, job, ledger, stop));
        }

        Ok(report)
    }

    /// Process the subjects of `job` on `workers` threads.
    ///
    /// Workers pull subject paths from a shared queue and read the engine
    /// through a shared reference; outcomes are reported in discovery order.
    pub fn process_all_subjects_parallel(
        &self,
        job: &BatchJob,
        workers: usize,
        ledger: &RunLedger,
        stop: &AtomicBool,
    ) -> Result<BatchReport, BatchError> {
        if workers <= 1 {
            return self.process_all_subjects(job, ledger, stop);
        }

        let subjects = self.prepare(job)?;
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<(usize, &Subject)>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, SubjectOutcome)>();

        for (i, subject) in subjects.iter().enumerate() {
            // The receiver is alive until the scope below ends
            let _ = task_tx.send((i, subject));
        }
        drop(task_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers.min(subjects.len().max(1)) {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for (i, subject) in task_rx.iter() {
                        let outcome = self.handle(subject, job, ledger, stop);
                        let _ = done_tx.send((i, outcome));
                    }
                });
            }
        });
        drop(done_tx);

        let mut outcomes: Vec<(usize, SubjectOutcome)> = done_rx.iter().collect();
        outcomes.sort_by_key(|(i, _)| *i);

        Ok(BatchReport {
            outcomes: outcomes.into_iter().map(|(_, o)| o).collect(),
        })
    }

    /// Discover the subjects of `job`.
    ///
    /// Only the first file (in sorted order) of each participant owns the
    /// output path; later files with the same id are marked so they are
    /// skipped instead of racing for the same table.
    fn prepare(&self, job: &BatchJob) -> Result<Vec<Subject>, BatchError> {
        std::fs::create_dir_all(&job.output_dir).map_err(|source| BatchError::OutputDir {
            dir: job.output_dir.clone(),
            source,
        })?;

        let paths =
            discover_subjects(&job.input_dir, &job.pattern).map_err(|source| {
                BatchError::Discovery {
                    dir: job.input_dir.clone(),
                    source,
                }
            })?;

        let mut owners: HashMap<String, PathBuf> = HashMap::new();
        let subjects = paths
            .into_iter()
            .map(|path| {
                let participant_id = participant_id(&path);
                let shadowed_by = match owners.get(&participant_id) {
                    Some(first) => Some(first.clone()),
                    None => {
                        owners.insert(participant_id.clone(), path.clone());
                        None
                    }
                };
                Subject {
                    participant_id,
                    path,
                    shadowed_by,
                }
            })
            .collect::<Vec<_>>();

        info!(
            subjects = subjects.len(),
            participants = owners.len(),
            input = %job.input_dir.display(),
            window_size = job.window_size,
            "starting batch"
        );
        Ok(subjects)
    }

    fn handle(
        &self,
        subject: &Subject,
        job: &BatchJob,
        ledger: &RunLedger,
        stop: &AtomicBool,
    ) -> SubjectOutcome {
        let output = output_path(&job.output_dir, &subject.participant_id);

        let status = if let Some(first) = &subject.shadowed_by {
            warn!(
                participant = %subject.participant_id,
                input = %subject.path.display(),
                first = %first.display(),
                "participant id already taken by an earlier file, skipping"
            );
            ledger.record_skipped();
            SubjectStatus::Skipped
        } else if stop.load(Ordering::SeqCst) {
            debug!(participant = %subject.participant_id, "run stopped, subject not started");
            ledger.record_cancelled();
            SubjectStatus::Cancelled
        } else {
            self.run_subject(
                &subject.participant_id,
                &subject.path,
                &output,
                job.window_size,
                ledger,
            )
        };

        SubjectOutcome {
            participant_id: subject.participant_id.clone(),
            input: subject.path.clone(),
            output,
            status,
        }
    }

    fn run_subject(
        &self,
        pid: &str,
        input: &Path,
        output: &Path,
        window_size: usize,
        ledger: &RunLedger,
    ) -> SubjectStatus {
        if output.exists() {
            info!(participant = pid, output = %output.display(), "already processed, skipping");
            ledger.record_skipped();
            return SubjectStatus::Skipped;
        }

        let fail = |stage: SubjectState, message: String| {
            error!(participant = pid, %stage, error = %message, "subject failed");
            ledger.record_failed();
            SubjectStatus::Errored { stage, message }
        };

        debug!(participant = pid, state = %SubjectState::Loading, "subject state");
        let series = match self.load_subject_series(input) {
            Ok(series) => series,
            Err(e) => return fail(SubjectState::Loading, e.to_string()),
        };

        debug!(participant = pid, state = %SubjectState::Windowing, rows = series.len(), "subject state");
        let table = match self.process_subject(pid, &series, window_size) {
            Ok(table) => table,
            Err(e) => return fail(SubjectState::Windowing, e.to_string()),
        };
        drop(series);

        debug!(participant = pid, state = %SubjectState::Writing, rows = table.len(), "subject state");
        if let Err(e) = table.persist(output) {
            return fail(SubjectState::Writing, e.to_string());
        }

        info!(
            participant = pid,
            windows = table.len(),
            feature_failures = table.feature_failures(),
            output = %output.display(),
            "subject done"
        );
        ledger.record_processed(table.len(), table.feature_failures());
        SubjectStatus::Done {
            windows: table.len(),
            feature_failures: table.feature_failures(),
        }
    }
}
