//! Descriptive statistics shared by the feature functions.
//!
//! Spread is always the population form (divide by `n`), and a NaN sample
//! poisons the statistic it feeds instead of being skipped.

use statrs::statistics::{Data, Median, Statistics};

pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    values.iter().population_std_dev()
}

pub fn min(values: &[f64]) -> f64 {
    Statistics::min(values.iter())
}

pub fn max(values: &[f64]) -> f64 {
    Statistics::max(values.iter())
}

/// `max - min`.
pub fn range(values: &[f64]) -> f64 {
    max(values) - min(values)
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    Data::new(values.to_vec()).median()
}

/// Least-squares slope of `values` against their sample index.
///
/// Fewer than two samples have no defined trend and yield 0.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);

    let mut covariance = 0.0;
    let mut x_spread = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        covariance += dx * (y - y_mean);
        x_spread += dx * dx;
    }

    covariance / x_spread
}

/// Count transitions from `<= threshold` to `> threshold` between
/// consecutive samples.
///
/// A run that is already above the threshold at the first sample is not a
/// crossing.
pub fn count_rising_edges(values: &[f64], threshold: f64) -> usize {
    values
        .windows(2)
        .filter(|pair| pair[0] <= threshold && pair[1] > threshold)
        .count()
}

/// Fraction of samples strictly above `threshold`.
pub fn fraction_above(values: &[f64], threshold: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().filter(|&&v| v > threshold).count() as f64 / values.len() as f64
}
