//! Cumulative counters and latency sketches for a load run.

use std::fmt;
use std::time::Duration;

use sketches_ddsketch::DDSketch;

/// Converts a duration into fractional milliseconds.
pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Totals for one kind of transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Counter {
    /// Number of successful transfers.
    pub count: u64,
    /// Total bytes transferred.
    pub bytes: u64,
    /// Total time spent transferring.
    pub elapsed: Duration,
}

impl Counter {
    /// Adds one successful transfer.
    pub fn record(&mut self, bytes: u64, elapsed: Duration) {
        self.count += 1;
        self.bytes += bytes;
        self.elapsed += elapsed;
    }

    /// Total time spent transferring, in milliseconds.
    pub fn milliseconds(&self) -> f64 {
        millis(self.elapsed)
    }

    /// Cumulative throughput in KB/s, computed as total bytes over total time.
    pub fn rate(&self) -> f64 {
        let milliseconds = self.milliseconds();
        if milliseconds == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / milliseconds * 1000.0 / 1024.0
    }
}

/// Counters that only ever grow over the lifetime of a [`LoadDriver`](crate::LoadDriver).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CumulativeStats {
    /// Successful uploads.
    pub uploads: Counter,
    /// Successful downloads.
    pub downloads: Counter,
    /// Failed transactions, regardless of the step that failed.
    pub errors: u64,
}

/// Latency distributions of successful transfers, in seconds.
#[derive(Clone, Default)]
pub struct Latencies {
    /// Upload latencies.
    pub upload: DDSketch,
    /// Download latencies.
    pub download: DDSketch,
}

impl fmt::Debug for Latencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latencies")
            .field("upload", &format_args!("[{} samples]", self.upload.count()))
            .field("download", &format_args!("[{} samples]", self.download.count()))
            .finish()
    }
}
