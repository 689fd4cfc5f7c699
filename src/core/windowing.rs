//! Partitioning of a subject series into fixed-size windows.
//!
//! Windows are contiguous, non-overlapping and exactly `window_size` rows
//! long. A trailing remainder shorter than `window_size` never forms a
//! window.

use crate::core::series::{Channel, RawSeries};
use std::collections::BTreeMap;
use std::ops::Range;

/// Number of complete windows in a series of `len` rows.
pub fn window_count(len: usize, window_size: usize) -> usize {
    len.checked_div(window_size).unwrap_or(0)
}

/// A borrowed view of one window of a [`RawSeries`].
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    index: usize,
    start: usize,
    end: usize,
    series: &'a RawSeries,
}

impl<'a> Window<'a> {
    /// Create a view over `rows` of `series`.
    pub fn new(index: usize, rows: Range<usize>, series: &'a RawSeries) -> Self {
        debug_assert!(rows.end <= series.len());
        Self {
            index,
            start: rows.start,
            end: rows.end,
            series,
        }
    }

    /// Position of this window in the series (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Row range covered by this window.
    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// First timestamp in the window.
    pub fn start_time(&self) -> f64 {
        self.series.timestamps()[self.start]
    }

    /// Last timestamp in the window.
    pub fn end_time(&self) -> f64 {
        self.series.timestamps()[self.end - 1]
    }

    /// Samples of `channel` inside this window.
    pub fn channel(&self, channel: Channel) -> Option<&'a [f64]> {
        self.series
            .channel(channel)
            .map(|values| &values[self.start..self.end])
    }

    /// Sleep-stage labels inside this window.
    pub fn labels(&self) -> Option<&'a [String]> {
        self.series
            .labels()
            .map(|labels| &labels[self.start..self.end])
    }

    /// Most frequent label in the window, see [`representative_label`].
    pub fn representative_label(&self) -> Option<&'a str> {
        self.labels().and_then(representative_label)
    }
}

/// Iterator over the complete windows of a series.
pub struct Windows<'a> {
    series: &'a RawSeries,
    window_size: usize,
    next_index: usize,
    count: usize,
}

impl<'a> Windows<'a> {
    pub fn new(series: &'a RawSeries, window_size: usize) -> Self {
        Self {
            series,
            window_size,
            next_index: 0,
            count: window_count(series.len(), window_size),
        }
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.count {
            return None;
        }
        let index = self.next_index;
        let start = index * self.window_size;
        self.next_index += 1;
        Some(Window::new(index, start..start + self.window_size, self.series))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows<'_> {}

impl RawSeries {
    /// Iterate over the complete windows of `window_size` rows.
    pub fn windows(&self, window_size: usize) -> Windows<'_> {
        Windows::new(self, window_size)
    }
}

/// Statistical mode of a label column.
///
/// Blank labels are missing scores and are not counted; a window with no
/// scored label has no representative. Ties resolve to the lexicographically
/// smallest of the tied labels, so the result depends only on the label
/// counts and never on row order.
pub fn representative_label(labels: &[String]) -> Option<&str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels.iter().filter(|l| !l.is_empty()) {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    // BTreeMap iterates in sorted order; strict > keeps the first tied label
    for (label, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}
