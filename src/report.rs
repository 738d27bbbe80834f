//! Throughput/latency reports and the reporter seam.
//!
//! Reports are plain derived values computed from a stats [`Snapshot`]; the
//! [`Reporter`] decides where the lines go. The default reporter writes to
//! the log sink on the `report` target.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::stats::Snapshot;

const NANOS_PER_MS: f64 = 1e6;
const NANOS_PER_SECOND: f64 = 1e9;

/// One periodic progress line.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProgressReport {
    pub ops_per_sec: f64,
    pub total_ms: f64,
    pub ave_latency_ms: f64,
    pub ave_tx_ms: f64,
}

impl From<&Snapshot> for ProgressReport {
    fn from(snap: &Snapshot) -> Self {
        let total = snap.end_time.saturating_sub(snap.start_time).max(1);
        Self {
            ops_per_sec: snap.op_count as f64 * NANOS_PER_SECOND / total as f64,
            total_ms: total as f64 / NANOS_PER_MS,
            ave_latency_ms: snap.latency_time as f64 / snap.op_count.max(1) as f64 / NANOS_PER_MS,
            ave_tx_ms: snap.tx_time as f64 / snap.tx_count.max(1) as f64 / NANOS_PER_MS,
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "   work={:.2}op/s; time={:.2}; ave latency={:.2}ms; ave tx={:.2}ms",
            self.ops_per_sec, self.total_ms, self.ave_latency_ms, self.ave_tx_ms
        )
    }
}

/// The terminal summary for a whole run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FinalReport {
    pub op_count: u64,
    pub row_count: u64,
    pub tx_count: u64,
    pub elapsed_ms: f64,
    /// Average pacing sleep per worker.
    pub sleep_ms: f64,
    pub ops_per_sec: f64,
    pub ave_latency_ms: f64,
    pub ave_tx_ms: f64,
    pub conflicts: u64,
    pub deadlocks: u64,
}

impl FinalReport {
    pub fn from_snapshot(snap: &Snapshot, threads: usize) -> Self {
        let total = snap.end_time.saturating_sub(snap.start_time).max(1);
        Self {
            op_count: snap.op_count,
            row_count: snap.row_count,
            tx_count: snap.tx_count,
            elapsed_ms: total as f64 / NANOS_PER_MS,
            sleep_ms: snap.inactive_time as f64 / threads.max(1) as f64 / NANOS_PER_MS,
            ops_per_sec: snap.op_count as f64 * NANOS_PER_SECOND / total as f64,
            ave_latency_ms: snap.latency_time as f64 / snap.op_count.max(1) as f64 / NANOS_PER_MS,
            ave_tx_ms: snap.tx_time as f64 / snap.tx_count.max(1) as f64 / NANOS_PER_MS,
            conflicts: snap.conflicts,
            deadlocks: snap.deadlocks,
        }
    }

    pub fn rollbacks(&self) -> u64 {
        self.conflicts + self.deadlocks
    }
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total statements={}; elapsed={:.2}ms (sleep={:.3}ms); rows={}; rate={:.2}op/s; ave latency={:.2}ms; ave tx={:.2}ms;",
            self.op_count,
            self.elapsed_ms,
            self.sleep_ms,
            self.row_count,
            self.ops_per_sec,
            self.ave_latency_ms,
            self.ave_tx_ms
        )
    }
}

/// Where report lines go. The monitor drives this once per report period and
/// once at the end of the run.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn progress(&self, report: &ProgressReport);
    async fn summary(&self, report: &FinalReport);
}

/// Default reporter: plain text lines on the log sink.
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn progress(&self, report: &ProgressReport) {
        tracing::info!(target: "report", "{report}");
    }

    async fn summary(&self, report: &FinalReport) {
        tracing::info!(target: "report", "{report}");
        if report.rollbacks() > 0 {
            tracing::info!(
                target: "report",
                "* Total Rollbacks={}; Deadlock={}; other={}",
                report.rollbacks(),
                report.deadlocks,
                report.conflicts
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            start_time: 1,
            end_time: 2_000_000_001, // 2 seconds later
            op_count: 1000,
            row_count: 50,
            tx_count: 500,
            latency_time: 1_000_000_000,  // 1ms per op
            inactive_time: 8_000_000_000, // 2s per worker over 4 workers
            ops_time: 1_200_000_000,
            tx_time: 1_500_000_000, // 3ms per tx
            conflicts: 2,
            deadlocks: 1,
        }
    }

    #[test]
    fn progress_ratios() {
        let report = ProgressReport::from(&snapshot());
        assert!((report.ops_per_sec - 500.0).abs() < 0.01);
        assert!((report.total_ms - 2000.0).abs() < 0.01);
        assert!((report.ave_latency_ms - 1.0).abs() < 0.01);
        assert!((report.ave_tx_ms - 3.0).abs() < 0.01);
    }

    #[test]
    fn final_report_divides_sleep_across_workers() {
        let report = FinalReport::from_snapshot(&snapshot(), 4);
        assert!((report.sleep_ms - 2000.0).abs() < 0.01);
        assert_eq!(report.rollbacks(), 3);
    }

    #[test]
    fn empty_snapshot_reports_zero_not_panic() {
        let report = ProgressReport::from(&Snapshot::default());
        assert_eq!(report.ops_per_sec, 0.0);
        let report = FinalReport::from_snapshot(&Snapshot::default(), 0);
        assert_eq!(report.op_count, 0);
    }

    #[test]
    fn display_shapes() {
        let progress = ProgressReport::from(&snapshot()).to_string();
        assert!(progress.starts_with("   work="));
        assert!(progress.contains("ave latency="));

        let summary = FinalReport::from_snapshot(&snapshot(), 4).to_string();
        assert!(summary.starts_with("Total statements=1000;"));
        assert!(summary.contains("(sleep="));
    }
}
