//! Per-channel feature functions.
//!
//! Each function reads the channels it needs from a [`Window`] and returns a
//! [`FeatureSet`] of named scalars. Functions are pure: they never look
//! outside the window they are given and never perform I/O.

use crate::core::series::Channel;
use crate::core::stats;
use crate::core::windowing::Window;
use thiserror::Error;

/// Errors raised while computing features for one window.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("window has no {0} channel")]
    MissingChannel(Channel),

    #[error("feature `{0}` was declared but not produced")]
    MissingFeature(String),

    #[error("feature `{0}` was produced but not declared")]
    UndeclaredFeature(String),

    #[error("{0}")]
    Computation(String),
}

/// Named scalar values produced by one feature function, in output order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    entries: Vec<(String, f64)>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named value.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut set = FeatureSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// A feature calculator that can be registered with the engine.
///
/// Implementations declare their feature names up front so the engine can
/// fix the table's columns before any window is processed.
pub trait FeatureFunction: Send + Sync {
    /// Names of every feature this function produces.
    fn feature_names(&self) -> &[&'static str];

    /// Compute the features for one window.
    fn compute(&self, window: &Window<'_>) -> Result<FeatureSet, FeatureError>;
}

/// Signature of the plain functions wrapped by [`ChannelFeatures`].
pub type ComputeFn = fn(&Window<'_>) -> Result<FeatureSet, FeatureError>;

/// A feature function backed by a plain `fn` and a static name list.
#[derive(Debug, Clone, Copy)]
pub struct ChannelFeatures {
    names: &'static [&'static str],
    compute: ComputeFn,
}

impl ChannelFeatures {
    pub const fn new(names: &'static [&'static str], compute: ComputeFn) -> Self {
        Self { names, compute }
    }
}

impl FeatureFunction for ChannelFeatures {
    fn feature_names(&self) -> &[&'static str] {
        self.names
    }

    fn compute(&self, window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
        (self.compute)(window)
    }
}

pub const BVP_FEATURES: &[&str] = &[
    "BVP_mean",
    "BVP_std",
    "BVP_min",
    "BVP_max",
    "BVP_range",
    "BVP_median",
];
pub const IBI_FEATURES: &[&str] = &["SDNN", "median_nni", "IBI_mean"];
pub const ACC_FEATURES: &[&str] = &[
    "x_std",
    "y_std",
    "z_std",
    "mag_mean",
    "mag_std",
    "mag_max",
    "movement_density",
    "burst_count",
];
pub const EDA_FEATURES: &[&str] = &["EDA_mean", "EDA_std", "EDA_trend"];
pub const TEMP_FEATURES: &[&str] = &["TEMP_mean", "TEMP_std", "TEMP_slope"];
pub const HR_FEATURES: &[&str] = &["HR_mean", "HR_std", "HR_range", "HR_trend"];

/// The standard feature set, in registration order.
pub fn default_feature_functions() -> Vec<(&'static str, ChannelFeatures)> {
    vec![
        ("bvp", ChannelFeatures::new(BVP_FEATURES, compute_bvp)),
        ("ibi", ChannelFeatures::new(IBI_FEATURES, compute_ibi)),
        ("acc", ChannelFeatures::new(ACC_FEATURES, compute_acc)),
        ("eda", ChannelFeatures::new(EDA_FEATURES, compute_eda)),
        ("temp", ChannelFeatures::new(TEMP_FEATURES, compute_temp)),
        ("hr", ChannelFeatures::new(HR_FEATURES, compute_hr)),
    ]
}

fn channel<'a>(window: &Window<'a>, channel: Channel) -> Result<&'a [f64], FeatureError> {
    window
        .channel(channel)
        .ok_or(FeatureError::MissingChannel(channel))
}

fn compute_bvp(window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
    Ok(bvp_features(channel(window, Channel::Bvp)?))
}

fn compute_ibi(window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
    Ok(ibi_features(channel(window, Channel::Ibi)?))
}

fn compute_acc(window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
    let x = channel(window, Channel::AccX)?;
    let y = channel(window, Channel::AccY)?;
    let z = channel(window, Channel::AccZ)?;
    Ok(acc_features(x, y, z))
}

fn compute_eda(window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
    Ok(eda_features(channel(window, Channel::Eda)?))
}

fn compute_temp(window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
    Ok(temp_features(channel(window, Channel::Temp)?))
}

fn compute_hr(window: &Window<'_>) -> Result<FeatureSet, FeatureError> {
    Ok(hr_features(channel(window, Channel::Hr)?))
}

/// Blood-volume pulse distribution.
pub fn bvp_features(bvp: &[f64]) -> FeatureSet {
    let min = stats::min(bvp);
    let max = stats::max(bvp);
    FeatureSet::from_iter([
        ("BVP_mean", stats::mean(bvp)),
        ("BVP_std", stats::std_dev(bvp)),
        ("BVP_min", min),
        ("BVP_max", max),
        ("BVP_range", max - min),
        ("BVP_median", stats::median(bvp)),
    ])
}

/// Time-domain HRV over inter-beat intervals given in seconds.
pub fn ibi_features(ibi_secs: &[f64]) -> FeatureSet {
    let ibi_ms: Vec<f64> = ibi_secs.iter().map(|v| v * 1000.0).collect();
    FeatureSet::from_iter([
        ("SDNN", stats::std_dev(&ibi_ms)),
        ("median_nni", stats::median(&ibi_ms)),
        ("IBI_mean", stats::mean(&ibi_ms)),
    ])
}

/// Movement features from the three accelerometer axes.
///
/// The activity threshold adapts to the window: magnitude mean plus one
/// magnitude standard deviation.
pub fn acc_features(x: &[f64], y: &[f64], z: &[f64]) -> FeatureSet {
    let magnitude: Vec<f64> = x
        .iter()
        .zip(y)
        .zip(z)
        .map(|((x, y), z)| (x * x + y * y + z * z).sqrt())
        .collect();

    let mag_mean = stats::mean(&magnitude);
    let mag_std = stats::std_dev(&magnitude);
    let threshold = mag_mean + mag_std;

    FeatureSet::from_iter([
        ("x_std", stats::std_dev(x)),
        ("y_std", stats::std_dev(y)),
        ("z_std", stats::std_dev(z)),
        ("mag_mean", mag_mean),
        ("mag_std", mag_std),
        ("mag_max", stats::max(&magnitude)),
        (
            "movement_density",
            stats::fraction_above(&magnitude, threshold),
        ),
        (
            "burst_count",
            stats::count_rising_edges(&magnitude, threshold) as f64,
        ),
    ])
}

pub fn eda_features(eda: &[f64]) -> FeatureSet {
    FeatureSet::from_iter([
        ("EDA_mean", stats::mean(eda)),
        ("EDA_std", stats::std_dev(eda)),
        ("EDA_trend", stats::linear_slope(eda)),
    ])
}

pub fn temp_features(temp: &[f64]) -> FeatureSet {
    FeatureSet::from_iter([
        ("TEMP_mean", stats::mean(temp)),
        ("TEMP_std", stats::std_dev(temp)),
        ("TEMP_slope", stats::linear_slope(temp)),
    ])
}

pub fn hr_features(hr: &[f64]) -> FeatureSet {
    FeatureSet::from_iter([
        ("HR_mean", stats::mean(hr)),
        ("HR_std", stats::std_dev(hr)),
        ("HR_range", stats::range(hr)),
        ("HR_trend", stats::linear_slope(hr)),
    ])
}
