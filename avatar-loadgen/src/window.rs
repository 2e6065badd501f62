//! A fixed-capacity window of recent transfer samples.

use std::collections::VecDeque;
use std::time::Duration;

use crate::stats::millis;

/// Number of samples kept by [`RollingWindow::default`].
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// A single completed transfer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// Number of bytes transferred.
    pub bytes: u64,
    /// Time the transfer took. Must be non-zero.
    pub elapsed: Duration,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }

    /// Throughput of this sample in bytes per millisecond.
    pub fn rate(&self) -> f64 {
        self.bytes as f64 / millis(self.elapsed)
    }
}

/// A FIFO of the most recent [`Sample`]s, holding at most `maxsize` entries.
///
/// The window is meant to have a single owner. [`LoadDriver`](crate::LoadDriver) keeps its
/// windows behind the same lock as the rest of its state.
#[derive(Clone, Debug)]
pub struct RollingWindow {
    maxsize: usize,
    samples: VecDeque<Sample>,
}

impl RollingWindow {
    /// Creates an empty window holding at most `maxsize` samples.
    pub fn new(maxsize: usize) -> Self {
        Self {
            maxsize,
            samples: VecDeque::with_capacity(maxsize.saturating_add(1)),
        }
    }

    /// Appends a sample, evicting and returning the oldest one once the window is over capacity.
    ///
    /// The sample's elapsed time must be non-zero, otherwise its rate is undefined.
    pub fn add(&mut self, sample: Sample) -> Option<Sample> {
        debug_assert!(
            !sample.elapsed.is_zero(),
            "rolling window samples need a non-zero elapsed time"
        );

        self.samples.push_back(sample);
        if self.samples.len() > self.maxsize {
            self.samples.pop_front()
        } else {
            None
        }
    }

    /// Returns the mean of the per-sample rates in bytes per millisecond, rounded to one decimal.
    ///
    /// This is deliberately not the aggregate `sum(bytes) / sum(elapsed)`: every sample weighs the
    /// same regardless of its size. Returns `0.0` for an empty window.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum: f64 = self.samples.iter().map(Sample::rate).sum();
        let average = sum / self.samples.len() as f64;
        (average * 10.0).round() / 10.0
    }

    /// The number of samples currently in this window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterates the samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
