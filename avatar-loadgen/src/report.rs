//! Periodic status lines and the final summary of a load run.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::driver::LoadDriverState;
use crate::stats::Counter;

/// Converts a rolling-window average in bytes per millisecond to KB/s.
fn window_rate(bytes_per_ms: f64) -> f64 {
    bytes_per_ms * 1000.0 / 1024.0
}

/// A point-in-time summary, logged periodically while the driver runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Status {
    /// Cumulative upload totals.
    pub uploads: Counter,
    /// Cumulative download totals.
    pub downloads: Counter,
    /// Rolling-window upload average in bytes per millisecond.
    pub recent_upload: f64,
    /// Rolling-window download average in bytes per millisecond.
    pub recent_download: f64,
    /// Number of failed transactions.
    pub errors: u64,
    /// Number of transactions in flight.
    pub active: usize,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploads: {} ({:.1} KB/s) downloads: {} ({:.1} KB/s) recent: {:.1}/{:.1} KB/s errors: {} active: {}",
            self.uploads.count,
            self.uploads.rate(),
            self.downloads.count,
            self.downloads.rate(),
            window_rate(self.recent_upload),
            window_rate(self.recent_download),
            self.errors,
            self.active,
        )
    }
}

/// Prints totals, throughput and latency percentiles of a finished run to stdout.
pub fn print_summary(state: &LoadDriverState, duration: Duration) {
    println!();
    println!("{} (duration: {:.2?})", "## SUMMARY".bold(), duration);
    print_counter(
        "UPLOAD:",
        &state.stats.uploads,
        &state.latency.upload,
        duration,
    );
    print_counter(
        "DOWNLOAD:",
        &state.stats.downloads,
        &state.latency.download,
        duration,
    );
    if state.stats.errors > 0 {
        println!(
            "{}",
            format!("{} FAILED TRANSACTIONS", state.stats.errors)
                .bold()
                .red()
        );
    }
}

fn print_counter(label: &str, counter: &Counter, timing: &DDSketch, duration: Duration) {
    if counter.count == 0 {
        println!("{} no completed transfers", label.bold().yellow());
        return;
    }

    println!(
        "{} ({} ops, {:.2})",
        label.bold().green(),
        counter.count.bold(),
        ByteSize::b(counter.bytes)
    );
    print_ops(counter.count, duration);
    print_throughput(counter.bytes, duration);
    println!("  transfer rate: {:.1} KB/s", counter.rate().bold());
    print_percentiles(timing, Duration::from_secs_f64);
}

fn quantile(sketch: &DDSketch, q: f64) -> f64 {
    sketch.quantile(q).ok().flatten().unwrap_or_default()
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let ops = sketch.count();
    if ops == 0 {
        return;
    }
    let avg = map(sketch.sum().unwrap_or_default() / ops as f64);
    let p50 = map(quantile(sketch, 0.5));
    let p90 = map(quantile(sketch, 0.9));
    let p99 = map(quantile(sketch, 0.99));
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(ops: u64, duration: Duration) {
    let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64().max(f64::EPSILON)) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}
