//! Shared run statistics.
//!
//! A fixed array of atomic counters shared by every worker and the monitor.
//! Every mutation is a single atomic operation; the monitor reads without
//! taking a lock and tolerates reads that cross a worker's multi-slot update.
//! Time slots hold nanoseconds on the clock of the owning [`Stats`] instance.

use std::array;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// First transaction start, set once by whichever worker gets there first.
pub const START_TIME: usize = 0;
/// End of the most recent committed transaction.
pub const END_TIME: usize = 1;
/// Statements executed.
pub const OPS_COUNT: usize = 2;
/// Rows iterated (only counted when `-iterate` is on).
pub const ROW_COUNT: usize = 3;
/// Transactions committed.
pub const TX_COUNT: usize = 4;
/// Sum of statement dispatch times.
pub const LATENCY_TIME: usize = 5;
/// Sum of pacing sleeps across all workers.
pub const INACTIVE_TIME: usize = 6;
/// Sum of statement times including row iteration.
pub const OPS_TIME: usize = 7;
/// Sum of whole-transaction times.
pub const TX_TIME: usize = 8;
/// Transactions rolled back by the database without a deadlock.
pub const ABORT_CONFLICT: usize = 9;
/// Transactions rolled back with "deadlock" in the error text.
pub const ABORT_DEADLOCK: usize = 10;

const SLOTS: usize = 11;

/// The shared counter array plus the monotonic clock its time slots use.
pub struct Stats {
    epoch: Instant,
    slots: [AtomicU64; SLOTS],
}

impl Stats {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            slots: array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Nanoseconds on this instance's clock. Never returns 0 once the
    /// process has run for a nanosecond, so 0 stays free as the
    /// "start not recorded yet" sentinel.
    pub fn now(&self) -> u64 {
        (self.epoch.elapsed().as_nanos() as u64).max(1)
    }

    pub fn add(&self, slot: usize, value: u64) {
        self.slots[slot].fetch_add(value, Ordering::Relaxed);
    }

    pub fn incr(&self, slot: usize) {
        self.slots[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self, slot: usize, value: u64) {
        self.slots[slot].store(value, Ordering::Relaxed);
    }

    pub fn get(&self, slot: usize) -> u64 {
        self.slots[slot].load(Ordering::Relaxed)
    }

    /// Record the start of the run. Racing workers all call this; only the
    /// first store wins and later calls leave the slot untouched.
    pub fn mark_start(&self) -> u64 {
        let now = self.now();
        let _ = self.slots[START_TIME].compare_exchange(0, now, Ordering::Relaxed, Ordering::Relaxed);
        self.get(START_TIME)
    }

    /// A plain copy of every slot, taken one relaxed load at a time.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            start_time: self.get(START_TIME),
            end_time: self.get(END_TIME),
            op_count: self.get(OPS_COUNT),
            row_count: self.get(ROW_COUNT),
            tx_count: self.get(TX_COUNT),
            latency_time: self.get(LATENCY_TIME),
            inactive_time: self.get(INACTIVE_TIME),
            ops_time: self.get(OPS_TIME),
            tx_time: self.get(TX_TIME),
            conflicts: self.get(ABORT_CONFLICT),
            deadlocks: self.get(ABORT_DEADLOCK),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the stats array with named fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub start_time: u64,
    pub end_time: u64,
    pub op_count: u64,
    pub row_count: u64,
    pub tx_count: u64,
    pub latency_time: u64,
    pub inactive_time: u64,
    pub ops_time: u64,
    pub tx_time: u64,
    pub conflicts: u64,
    pub deadlocks: u64,
}
