//! Configuration for the sleep feature pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration for a processing run.
///
/// Every value the engine needs is carried here and handed over explicitly;
/// nothing is read from the environment while subjects are processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sampling frequency of the subject files (Hz)
    pub sampling_freq: u32,

    /// Length of each feature window (seconds)
    pub window_duration_secs: f64,

    /// Directory holding the raw subject files
    pub input_dir: PathBuf,

    /// Directory receiving one feature table per subject
    pub output_dir: PathBuf,

    /// File-name pattern selecting subject files (`*`, `?` and `[...]`)
    pub file_pattern: String,

    /// Number of subjects processed concurrently
    pub workers: usize,

    /// Directory for run reports
    pub report_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-sleep-features");

        Self {
            sampling_freq: 64,
            window_duration_secs: 30.0,
            input_dir: PathBuf::from("physionet_data"),
            output_dir: PathBuf::from("downsampled_data"),
            file_pattern: "*.csv".to_string(),
            workers: 1,
            report_dir: data_dir.join("reports"),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does
    /// not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-sleep-features")
            .join("config.json")
    }

    /// Window length in samples for this configuration.
    pub fn window_size(&self) -> Result<usize, ConfigError> {
        window_size(self.sampling_freq, self.window_duration_secs)
    }

    /// Ensure the output and report directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.report_dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Number of samples in a window of `duration_secs` at `sampling_freq` Hz.
///
/// Equivalent to `sampling_freq / target_freq` with `target_freq` the
/// window rate; fractional samples are truncated.
pub fn window_size(sampling_freq: u32, duration_secs: f64) -> Result<usize, ConfigError> {
    if sampling_freq == 0 {
        return Err(ConfigError::InvalidSamplingFrequency(sampling_freq));
    }
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(ConfigError::InvalidWindowDuration(duration_secs));
    }

    let samples = (sampling_freq as f64 * duration_secs).floor() as usize;
    if samples == 0 {
        return Err(ConfigError::InvalidWindowSize(samples));
    }
    Ok(samples)
}

/// Setup errors. Any of these stops a run before the first subject.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("sampling frequency must be positive, got {0}")]
    InvalidSamplingFrequency(u32),

    #[error("window duration must be a positive number of seconds, got {0}")]
    InvalidWindowDuration(f64),

    #[error("window size must be at least one sample, got {0}")]
    InvalidWindowSize(usize),

    #[error("feature `{feature}` from `{incoming}` is already produced by `{existing}`")]
    DuplicateFeature {
        feature: String,
        existing: String,
        incoming: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sampling_freq, 64);
        assert_eq!(config.window_duration_secs, 30.0);
        assert_eq!(config.file_pattern, "*.csv");
        assert_eq!(config.window_size(), Ok(1920));
    }

    #[test]
    fn test_window_size() {
        assert_eq!(window_size(64, 30.0), Ok(1920));
        assert_eq!(window_size(64, 1.0), Ok(64));
        assert_eq!(window_size(64, 0.5), Ok(32));
        assert_eq!(window_size(4, 0.3), Ok(1));
    }

    #[test]
    fn test_window_size_rejects_degenerate_settings() {
        assert_eq!(
            window_size(0, 30.0),
            Err(ConfigError::InvalidSamplingFrequency(0))
        );
        assert!(matches!(
            window_size(64, 0.0),
            Err(ConfigError::InvalidWindowDuration(_))
        ));
        assert!(matches!(
            window_size(64, f64::NAN),
            Err(ConfigError::InvalidWindowDuration(_))
        ));
        assert_eq!(window_size(64, 0.01), Err(ConfigError::InvalidWindowSize(0)));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("synheart-sleep-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let config = Config {
            sampling_freq: 32,
            window_duration_secs: 10.0,
            workers: 4,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("synheart-sleep-config-absent/config.json");
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }
}
