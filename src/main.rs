//! Synheart Sleep Features CLI
//!
//! Batch feature extraction over wearable sleep recordings.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use synheart_sleep_features::{
    config::Config,
    core::{BatchJob, FeatureEngine, SubjectStatus},
    ledger::RunLedger,
    VERSION,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "synheart-sleep")]
#[command(author = "Synheart")]
#[command(version = VERSION)]
#[command(about = "Windowed feature extraction from wearable sleep recordings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract feature tables for every subject in the input directory
    Process {
        /// Directory with raw subject files
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Directory receiving one feature table per subject
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// File-name pattern selecting subject files
        #[arg(long)]
        pattern: Option<String>,

        /// Sampling frequency of the subject files (Hz)
        #[arg(long)]
        sampling_freq: Option<u32>,

        /// Window length in seconds
        #[arg(long)]
        window_secs: Option<f64>,

        /// Number of subjects processed concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Where to write the run report (defaults to the report directory)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List the feature columns produced per window
    Features,

    /// Show configuration
    Config {
        /// Persist the current configuration to the config file
        #[arg(long)]
        save: bool,
    },

    /// Download DREAMT subject files from PhysioNet
    #[cfg(feature = "download")]
    Download {
        /// PhysioNet username
        #[arg(long)]
        username: String,

        /// Environment variable holding the PhysioNet password
        #[arg(long, default_value = "PHYSIONET_PASSWORD")]
        password_env: String,

        /// Destination directory (defaults to the configured input directory)
        #[arg(long)]
        dest: Option<PathBuf>,

        /// First subject number
        #[arg(long, default_value = "8")]
        first: u32,

        /// Number of consecutive subjects to fetch
        #[arg(long, default_value = "23")]
        count: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("synheart_sleep_features=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            output,
            pattern,
            sampling_freq,
            window_secs,
            workers,
            report,
        } => {
            let mut config = load_config();
            if let Some(input) = input {
                config.input_dir = input;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            if let Some(pattern) = pattern {
                config.file_pattern = pattern;
            }
            if let Some(freq) = sampling_freq {
                config.sampling_freq = freq;
            }
            if let Some(secs) = window_secs {
                config.window_duration_secs = secs;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            cmd_process(&config, report)
        }
        Commands::Features => cmd_features(),
        Commands::Config { save } => cmd_config(save),
        #[cfg(feature = "download")]
        Commands::Download {
            username,
            password_env,
            dest,
            first,
            count,
        } => cmd_download(username, &password_env, dest, first, count),
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "could not load config, using defaults");
            Config::default()
        }
    }
}

fn cmd_process(config: &Config, report: Option<PathBuf>) -> anyhow::Result<()> {
    // Setup errors abort before any subject is touched
    let job = BatchJob::from_config(config).context("invalid configuration")?;
    let engine = FeatureEngine::with_default_features().context("invalid feature registry")?;
    config
        .ensure_directories()
        .context("could not create output directories")?;

    println!("Synheart Sleep Features v{VERSION}");
    println!();
    println!("  Input: {:?}", config.input_dir);
    println!("  Output: {:?}", config.output_dir);
    println!("  Pattern: {}", config.file_pattern);
    println!(
        "  Window: {}s at {} Hz ({} samples)",
        config.window_duration_secs, config.sampling_freq, job.window_size
    );
    println!("  Workers: {}", config.workers.max(1));
    println!();
    println!("Press Ctrl+C to stop after the current subject");
    println!();

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    let ledger = RunLedger::new();
    let batch = engine.process_all_subjects_parallel(&job, config.workers, &ledger, &stop)?;

    for outcome in &batch.outcomes {
        match &outcome.status {
            SubjectStatus::Done {
                windows,
                feature_failures,
            } => println!(
                "[{}] {} windows, {} feature failures -> {:?}",
                outcome.participant_id, windows, feature_failures, outcome.output
            ),
            SubjectStatus::Skipped => {
                println!("[{}] skipped, already processed", outcome.participant_id)
            }
            SubjectStatus::Errored { stage, message } => {
                eprintln!("[{}] failed while {stage}: {message}", outcome.participant_id)
            }
            SubjectStatus::Cancelled => println!("[{}] cancelled", outcome.participant_id),
        }
    }

    let report_path =
        report.unwrap_or_else(|| config.report_dir.join(ledger.report_file_name()));
    match ledger.save(&report_path) {
        Ok(()) => info!(path = %report_path.display(), "run report saved"),
        Err(e) => warn!(error = %e, "could not save run report"),
    }

    println!();
    println!("{}", ledger.summary());

    if batch.failed() > 0 {
        bail!("{} subject(s) failed", batch.failed());
    }
    Ok(())
}

fn cmd_features() -> anyhow::Result<()> {
    let engine = FeatureEngine::with_default_features()?;

    println!("Feature columns");
    println!("===============");
    println!();
    for name in engine.registry().names() {
        println!("{name}");
    }
    println!();
    for column in engine.registry().columns() {
        println!("  {column}");
    }
    Ok(())
}

fn cmd_config(save: bool) -> anyhow::Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Window size: {} samples", config.window_size()?);
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);

    if save {
        config.save()?;
        println!();
        println!("Saved to {:?}", Config::config_path());
    }
    Ok(())
}

#[cfg(feature = "download")]
fn cmd_download(
    username: String,
    password_env: &str,
    dest: Option<PathBuf>,
    first: u32,
    count: u32,
) -> anyhow::Result<()> {
    use synheart_sleep_features::download::{DownloadConfig, DownloadOutcome, PhysioNetClient};

    let password = std::env::var(password_env)
        .with_context(|| format!("set {password_env} to your PhysioNet password"))?;
    let dest = dest.unwrap_or_else(|| load_config().input_dir);

    let client = PhysioNetClient::login(DownloadConfig::new(username, password))?;

    let mut failures = 0;
    for number in first..first.saturating_add(count) {
        match client.download_subject(number, &dest) {
            Ok(DownloadOutcome::AlreadyComplete) => println!("S{number:03}: already complete"),
            Ok(DownloadOutcome::Downloaded { bytes }) => {
                println!("S{number:03}: downloaded {bytes} bytes")
            }
            Err(e) => {
                eprintln!("S{number:03}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} download(s) failed");
    }
    Ok(())
}
