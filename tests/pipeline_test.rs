//! End-to-end tests for batch feature extraction over subject files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use synheart_sleep_features::config::window_size;
use synheart_sleep_features::core::{
    BatchJob, FeatureEngine, FeatureError, FeatureFunction, FeatureSet, SubjectState,
    SubjectStatus, Window,
};
use synheart_sleep_features::ledger::RunLedger;
use uuid::Uuid;

const HEADER: &str = "TIMESTAMP,BVP,ACC_X,ACC_Y,ACC_Z,TEMP,EDA,HR,IBI,Sleep_Stage,\
                      Obstructive_Apnea,Central_Apnea,Hypopnea,Multiple_Events";

struct TestDirs {
    root: PathBuf,
    input: PathBuf,
    output: PathBuf,
}

impl TestDirs {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("synheart-sleep-test-{}", Uuid::new_v4()));
        let input = root.join("input");
        let output = root.join("output");
        std::fs::create_dir_all(&input).unwrap();
        Self {
            root,
            input,
            output,
        }
    }

    fn job(&self) -> BatchJob {
        BatchJob::new(&self.input, &self.output, "*.csv", window_size(64, 30.0).unwrap()).unwrap()
    }
}

impl Drop for TestDirs {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// A 64 Hz recording: `unscored` rows labelled `P`, then `rows` scored rows.
fn subject_csv(rows: usize, unscored: usize) -> String {
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for i in 0..unscored + rows {
        let t = i as f64 / 64.0;
        let stage = if i < unscored {
            "P"
        } else if i < unscored + 1920 {
            "W"
        } else {
            "N2"
        };
        let _ = writeln!(
            csv,
            "{t},{},{},{},{},{},{},{},{},{stage},,,,",
            (i % 13) as f64 - 6.0,
            (i % 5) as f64,
            (i % 3) as f64,
            60.0 + (i % 7) as f64,
            33.0 + i as f64 * 0.0001,
            0.2 + (i % 11) as f64 * 0.01,
            62.0 + (i % 9) as f64,
            0.9 + (i % 4) as f64 * 0.05,
        );
    }
    csv
}

fn write_subject(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn read_table(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

fn run(dirs: &TestDirs) -> synheart_sleep_features::BatchReport {
    let engine = FeatureEngine::with_default_features().unwrap();
    engine
        .process_all_subjects(&dirs.job(), &RunLedger::new(), &AtomicBool::new(false))
        .unwrap()
}

#[test]
fn test_window_bounds_and_stages() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S002_whole_df.csv", &subject_csv(5760, 0));

    let report = run(&dirs);
    assert_eq!(report.processed(), 1);
    assert_eq!(
        report.outcomes[0].status,
        SubjectStatus::Done {
            windows: 3,
            feature_failures: 0
        }
    );

    let output = dirs.output.join("S002_processed.csv");
    let rows = read_table(&output);
    assert_eq!(rows.len(), 3);

    let bounds: Vec<(f64, f64)> = rows
        .iter()
        .map(|r| (r[1].parse().unwrap(), r[2].parse().unwrap()))
        .collect();
    assert_eq!(
        bounds,
        [
            (0.0, 1919.0 / 64.0),
            (1920.0 / 64.0, 3839.0 / 64.0),
            (3840.0 / 64.0, 5759.0 / 64.0),
        ]
    );

    assert!(rows.iter().all(|r| &r[0] == "S002"));
    let stages: Vec<&str> = rows.iter().map(|r| &r[3]).collect();
    assert_eq!(stages, ["W", "N2", "N2"]);

    let mut reader = csv::Reader::from_path(&output).unwrap();
    let header = reader.headers().unwrap().clone();
    assert_eq!(header.len(), 4 + 27);
    assert_eq!(&header[3], "sleep_stage");
    assert!(!header.iter().any(|h| h == "Hypopnea"));
}

#[test]
fn test_remainder_rows_are_discarded() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S003_whole_df.csv", &subject_csv(1920 * 2 + 1919, 0));

    run(&dirs);
    assert_eq!(read_table(&dirs.output.join("S003_processed.csv")).len(), 2);
}

#[test]
fn test_unscored_rows_are_dropped() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S004_whole_df.csv", &subject_csv(3840, 100));

    run(&dirs);
    let rows = read_table(&dirs.output.join("S004_processed.csv"));
    assert_eq!(rows.len(), 2);
    // First scored row has index 100
    assert_eq!(rows[0][1].parse::<f64>().unwrap(), 100.0 / 64.0);
    assert!(rows.iter().all(|r| &r[3] != "P"));
}

#[test]
fn test_second_run_skips_and_leaves_outputs_untouched() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S002_whole_df.csv", &subject_csv(1920, 0));
    write_subject(&dirs.input, "S005_whole_df.csv", &subject_csv(3840, 0));

    let first = run(&dirs);
    assert_eq!(first.processed(), 2);
    let before = std::fs::read(dirs.output.join("S005_processed.csv")).unwrap();

    let second = run(&dirs);
    assert_eq!(second.processed(), 0);
    assert_eq!(second.skipped(), 2);
    assert_eq!(
        std::fs::read(dirs.output.join("S005_processed.csv")).unwrap(),
        before
    );
}

#[test]
fn test_outputs_are_byte_identical_across_runs() {
    let a = TestDirs::new();
    let b = TestDirs::new();
    let csv = subject_csv(5760, 50);
    write_subject(&a.input, "S006_whole_df.csv", &csv);
    write_subject(&b.input, "S006_whole_df.csv", &csv);

    run(&a);
    run(&b);
    assert_eq!(
        std::fs::read(a.output.join("S006_processed.csv")).unwrap(),
        std::fs::read(b.output.join("S006_processed.csv")).unwrap()
    );
}

#[test]
fn test_failed_subject_does_not_stop_batch() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S002_whole_df.csv", &subject_csv(1920, 0));
    // Only TIMESTAMP and BVP, so IBI is the first missing channel
    write_subject(&dirs.input, "S003_whole_df.csv", "TIMESTAMP,BVP\n0,1.0\n");
    write_subject(&dirs.input, "S004_whole_df.csv", &subject_csv(1920, 0));

    let ledger = RunLedger::new();
    let engine = FeatureEngine::with_default_features().unwrap();
    let report = engine
        .process_all_subjects(&dirs.job(), &ledger, &AtomicBool::new(false))
        .unwrap();

    assert_eq!(report.processed(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcomes[1].participant_id, "S003");
    assert!(matches!(
        report.outcomes[1].status,
        SubjectStatus::Errored {
            stage: SubjectState::Loading,
            ..
        }
    ));

    let mut written: Vec<String> = std::fs::read_dir(&dirs.output)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(written, ["S002_processed.csv", "S004_processed.csv"]);

    let stats = ledger.stats();
    assert_eq!(stats.subjects_processed, 2);
    assert_eq!(stats.subjects_failed, 1);
    assert_eq!(stats.windows_emitted, 2);
}

#[test]
fn test_pattern_selects_subjects() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S002_whole_df.csv", &subject_csv(1920, 0));
    write_subject(&dirs.input, "notes.txt", "not a subject");

    let report = run(&dirs);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].participant_id, "S002");
}

#[test]
fn test_parallel_matches_sequential() {
    let seq = TestDirs::new();
    let par = TestDirs::new();
    for n in 2..8 {
        let name = format!("S00{n}_whole_df.csv");
        let csv = subject_csv(1920 * (n % 3 + 1), n);
        write_subject(&seq.input, &name, &csv);
        write_subject(&par.input, &name, &csv);
    }

    let engine = FeatureEngine::with_default_features().unwrap();
    let stop = AtomicBool::new(false);
    let sequential = engine
        .process_all_subjects(&seq.job(), &RunLedger::new(), &stop)
        .unwrap();
    let parallel = engine
        .process_all_subjects_parallel(&par.job(), 4, &RunLedger::new(), &stop)
        .unwrap();

    let ids = |r: &synheart_sleep_features::BatchReport| {
        r.outcomes
            .iter()
            .map(|o| (o.participant_id.clone(), o.status.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&sequential), ids(&parallel));
    assert_eq!(parallel.processed(), 6);

    for n in 2..8 {
        let name = format!("S00{n}_processed.csv");
        assert_eq!(
            std::fs::read(seq.output.join(&name)).unwrap(),
            std::fs::read(par.output.join(&name)).unwrap()
        );
    }
}

#[test]
fn test_shared_participant_id_is_processed_once() {
    let seq = TestDirs::new();
    let par = TestDirs::new();
    for dirs in [&seq, &par] {
        write_subject(&dirs.input, "S002_whole_df.csv", &subject_csv(1920, 0));
        write_subject(&dirs.input, "S002_whole_df_retake.csv", &subject_csv(3840, 0));
        write_subject(&dirs.input, "S003_whole_df.csv", &subject_csv(1920, 0));
    }

    let engine = FeatureEngine::with_default_features().unwrap();
    let stop = AtomicBool::new(false);
    let sequential = engine
        .process_all_subjects(&seq.job(), &RunLedger::new(), &stop)
        .unwrap();
    let ledger = RunLedger::new();
    let parallel = engine
        .process_all_subjects_parallel(&par.job(), 3, &ledger, &stop)
        .unwrap();

    for report in [&sequential, &parallel] {
        let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status.clone()).collect();
        assert_eq!(
            statuses,
            [
                SubjectStatus::Done {
                    windows: 1,
                    feature_failures: 0
                },
                SubjectStatus::Skipped,
                SubjectStatus::Done {
                    windows: 1,
                    feature_failures: 0
                },
            ]
        );
        assert!(report.outcomes[1].input.ends_with("S002_whole_df_retake.csv"));
    }
    assert_eq!(ledger.stats().subjects_skipped, 1);

    // The first file in sorted order owns the table
    assert_eq!(read_table(&par.output.join("S002_processed.csv")).len(), 1);
    let mut written: Vec<String> = std::fs::read_dir(&par.output)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(written, ["S002_processed.csv", "S003_processed.csv"]);
}

/// Raises the stop flag from inside the first window it sees.
struct StopOnFirstWindow {
    stop: Arc<AtomicBool>,
}

impl FeatureFunction for StopOnFirstWindow {
    fn feature_names(&self) -> &[&'static str] {
        &["stop_requested"]
    }

    fn compute(&self, _window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
        self.stop.store(true, Ordering::SeqCst);
        Ok(FeatureSet::from_iter([("stop_requested", 1.0)]))
    }
}

#[test]
fn test_in_flight_subject_finishes_after_stop() {
    let dirs = TestDirs::new();
    for n in 2..5 {
        write_subject(&dirs.input, &format!("S00{n}_whole_df.csv"), &subject_csv(3840, 0));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut engine = FeatureEngine::with_default_features().unwrap();
    engine
        .register("stop", StopOnFirstWindow { stop: stop.clone() })
        .unwrap();

    let ledger = RunLedger::new();
    let report = engine
        .process_all_subjects(&dirs.job(), &ledger, &stop)
        .unwrap();

    assert_eq!(
        report.outcomes[0].status,
        SubjectStatus::Done {
            windows: 2,
            feature_failures: 0
        }
    );
    assert!(report.outcomes[1..]
        .iter()
        .all(|o| o.status == SubjectStatus::Cancelled));
    assert_eq!(ledger.stats().subjects_processed, 1);
    assert_eq!(ledger.stats().subjects_cancelled, 2);

    // The stopped subject still wrote its complete table
    let rows = read_table(&dirs.output.join("S002_processed.csv"));
    assert_eq!(rows.len(), 2);
    let written = std::fs::read_dir(&dirs.output).unwrap().count();
    assert_eq!(written, 1);
}

#[test]
fn test_stopped_run_cancels_remaining_subjects() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S002_whole_df.csv", &subject_csv(1920, 0));
    write_subject(&dirs.input, "S003_whole_df.csv", &subject_csv(1920, 0));

    let ledger = RunLedger::new();
    let engine = FeatureEngine::with_default_features().unwrap();
    let report = engine
        .process_all_subjects_parallel(&dirs.job(), 2, &ledger, &AtomicBool::new(true))
        .unwrap();

    assert_eq!(report.cancelled(), 2);
    assert_eq!(ledger.stats().subjects_cancelled, 2);
    assert_eq!(std::fs::read_dir(&dirs.output).unwrap().count(), 0);
}

#[test]
fn test_missing_input_dir_is_batch_error() {
    let dirs = TestDirs::new();
    let job = BatchJob::new(dirs.root.join("absent"), &dirs.output, "*.csv", 1920).unwrap();
    let engine = FeatureEngine::with_default_features().unwrap();

    let result = engine.process_all_subjects(&job, &RunLedger::new(), &AtomicBool::new(false));
    assert!(result.is_err());
}

#[test]
fn test_run_report_is_saved() {
    let dirs = TestDirs::new();
    write_subject(&dirs.input, "S002_whole_df.csv", &subject_csv(1920, 0));

    let ledger = RunLedger::new();
    let engine = FeatureEngine::with_default_features().unwrap();
    engine
        .process_all_subjects(&dirs.job(), &ledger, &AtomicBool::new(false))
        .unwrap();

    let report_path = dirs.root.join("reports").join(ledger.report_file_name());
    ledger.save(&report_path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["stats"]["subjects_processed"], 1);
    assert_eq!(json["stats"]["windows_emitted"], 1);
}
