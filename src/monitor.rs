//! The statistics monitor task.
//!
//! Runs alongside the workers: wakes once per report period, snapshots the
//! shared stats and emits an incremental line, then produces the terminal
//! summary once the deadline (plus a small grace period for in-flight
//! transactions) has passed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::report::{FinalReport, LogReporter, ProgressReport, Reporter};
use crate::stats::Stats;

/// Extra time past the worker deadline so the last transactions land in the
/// final summary.
const GRACE: Duration = Duration::from_millis(100);

pub struct Monitor {
    stats: Arc<Stats>,
    barrier: Arc<Barrier>,
    deadline: Instant,
    report_period: Duration,
    threads: usize,
    reporter: Box<dyn Reporter>,
}

impl Monitor {
    pub fn new(
        stats: Arc<Stats>,
        barrier: Arc<Barrier>,
        duration: Duration,
        report_period: Duration,
        threads: usize,
    ) -> Self {
        Self {
            stats,
            barrier,
            deadline: Instant::now() + duration + GRACE,
            report_period,
            threads,
            reporter: Box::new(LogReporter),
        }
    }

    /// Swap the default log reporter for another sink.
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Report until the deadline, then emit and return the final summary.
    pub async fn run(self) -> FinalReport {
        self.barrier.wait().await;
        debug!("monitor starting");

        loop {
            let now = Instant::now();
            if now >= self.deadline {
                break;
            }
            // never sleep past the deadline; the last tick is shortened
            time::sleep(self.report_period.min(self.deadline - now)).await;

            let snap = self.stats.snapshot();
            if snap.op_count == 0 {
                continue;
            }
            self.reporter.progress(&ProgressReport::from(&snap)).await;
        }

        let report = FinalReport::from_snapshot(&self.stats.snapshot(), self.threads);
        self.reporter.summary(&report).await;
        report
    }
}
