//! The SQL worker task.
//!
//! Each worker loops until the wall-clock deadline: acquire a pooled
//! connection, run `batch` parametrised statements inside one transaction,
//! commit, record stats, then sleep according to the pacing policy.
//!
//! # Pacing
//!
//! In rate mode every worker aims for a per-worker transaction time of
//! `1e9 * threads / rate` nanoseconds. Rather than sleeping the per-
//! transaction deficit (which oscillates), the worker keeps a sliding window
//! of recent `(start, end)` pairs and sleeps the *cumulative* deficit of the
//! window, pulling the sliding average onto the target. In load mode the
//! worker sleeps a fixed fraction of the observed response time
//! (`(100 - load) / load`), which holds the database at roughly `load`
//! percent busy.
//!
//! # Failures
//!
//! Errors inside a transaction are classified rather than propagated:
//! rollback conditions are counted (deadlock vs conflict) and the loop
//! continues; a connection dying mid-flight is logged and the next iteration
//! picks up a replacement from the pool; failure to obtain a connection is
//! retried with linear backoff before giving up; anything else ends the
//! worker. A worker ending early never ends the run.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::{Acquire, Any, AnyPool, Transaction};
use tokio::sync::Barrier;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::data::DataTable;
use crate::error::Result;
use crate::generator::{Value, ValueGenerator};
use crate::ring::RingHistory;
use crate::stats::{self, Stats};
use crate::template::{StatementTemplate, Verb};

const MAX_CONNECT_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

pub struct SqlWorker {
    id: usize,
    pool: AnyPool,
    barrier: Arc<Barrier>,
    stats: Arc<Stats>,
    sql: String,
    verb: Verb,
    generators: Vec<ValueGenerator>,
    rng: StdRng,
    ring: RingHistory,
    deadline: Instant,
    batch: u32,
    iterate: bool,
    target_tx_time: u64,
    desaturation: f64,
}

impl SqlWorker {
    /// Build one worker. Generator instances (and the random source feeding
    /// them) belong to this worker alone.
    pub fn new(
        id: usize,
        pool: AnyPool,
        barrier: Arc<Barrier>,
        stats: Arc<Stats>,
        template: &StatementTemplate,
        table: &Arc<DataTable>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            id,
            pool,
            barrier,
            stats,
            sql: template.sql().to_string(),
            verb: template.verb(),
            generators: template.generators(table)?,
            rng: StdRng::from_os_rng(),
            ring: RingHistory::new(config.history_capacity()),
            deadline: Instant::now() + config.duration(),
            batch: config.batch,
            iterate: config.iterate,
            target_tx_time: config.target_tx_time(),
            desaturation: config.desaturation(),
        })
    }

    pub async fn run(mut self) {
        self.barrier.wait().await;
        self.stats.mark_start();

        let mut retry = 0u32;
        while Instant::now() < self.deadline {
            match self.transaction().await {
                Ok(()) => {}
                Err(err) => match Failure::classify(&err) {
                    Failure::Rollback { deadlock } => {
                        debug!(worker = self.id, %err, "transaction rolled back");
                        record_rollback(&self.stats, deadlock);
                    }
                    Failure::Transient => {
                        info!(
                            worker = self.id,
                            %err,
                            "connection lost - continuing on a replacement connection"
                        );
                    }
                    Failure::Connect => {
                        retry += 1;
                        if retry > MAX_CONNECT_RETRIES {
                            warn!(worker = self.id, "too many connection retries - exiting");
                            break;
                        }
                        info!(worker = self.id, retry, %err, "unable to obtain a connection - retrying");
                        time::sleep(RETRY_BACKOFF * retry).await;
                    }
                    Failure::Fatal => {
                        error!(worker = self.id, sql = %self.sql, %err, "unrecoverable error - exiting worker");
                        break;
                    }
                },
            }
        }
        debug!(worker = self.id, "worker finished");
    }

    /// One full transaction: `batch` statements, a commit, and the pacing
    /// sleep. Errors bubble out for classification by the run loop.
    async fn transaction(&mut self) -> sqlx::Result<()> {
        let begin = self.stats.now();

        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let batch = match self.execute_batch(&mut tx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tx.rollback().await.ok();
                return Err(err);
            }
        };

        self.stats.add(stats::LATENCY_TIME, batch.response);
        self.stats.add(stats::OPS_TIME, batch.elapsed);
        self.stats.incr(stats::TX_COUNT);
        self.stats.add(stats::OPS_COUNT, self.batch as u64);
        self.stats.add(stats::ROW_COUNT, batch.rows);

        tx.commit().await?;
        let end = self.stats.now();

        self.stats.add(stats::TX_TIME, end.saturating_sub(begin));
        self.ring.add(begin, end);
        self.stats.set(stats::END_TIME, end);

        debug!(
            worker = self.id,
            tx_ms = (end.saturating_sub(begin)) as f64 / 1e6,
            op_ms = batch.response as f64 / 1e6,
            "committed"
        );

        let mut inactive = 0u64;
        if self.target_tx_time > 0 {
            let sleep = self.ring.sleep_time(self.target_tx_time);
            if sleep > 0 {
                debug!(worker = self.id, sleep_ms = sleep as f64 / 1e6, "pacing sleep");
                time::sleep(Duration::from_nanos(sleep)).await;
                inactive += sleep;
            }
        } else if self.desaturation > 0.0 && self.ring.len() > 1 {
            let sleep = (batch.response as f64 * self.desaturation) as u64;
            if sleep > 0 {
                debug!(worker = self.id, sleep_ms = sleep as f64 / 1e6, "desaturation sleep");
                time::sleep(Duration::from_nanos(sleep)).await;
                inactive += sleep;
            }
        }
        if inactive > 0 {
            self.stats.add(stats::INACTIVE_TIME, inactive);
        }

        Ok(())
    }

    /// Run `batch` statements on the open transaction, accumulating dispatch
    /// time (`response`), total statement time including row iteration
    /// (`elapsed`), and the iterated row count.
    async fn execute_batch(&mut self, tx: &mut Transaction<'_, Any>) -> sqlx::Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for _ in 0..self.batch {
            let mut query = sqlx::query(&self.sql);
            for generator in &self.generators {
                query = bind_value(query, generator.next_value(&mut self.rng));
            }

            let start = self.stats.now();
            match self.verb {
                Verb::Select if self.iterate => {
                    let mut rows = query.fetch(&mut **tx);
                    let first = rows.try_next().await?;
                    outcome.response += self.stats.now().saturating_sub(start);
                    if first.is_some() {
                        outcome.rows += 1;
                        while rows.try_next().await?.is_some() {
                            outcome.rows += 1;
                        }
                    }
                }
                Verb::Select | Verb::Insert | Verb::Update | Verb::Delete | Verb::Execute => {
                    query.execute(&mut **tx).await?;
                    outcome.response += self.stats.now().saturating_sub(start);
                }
            }
            outcome.elapsed += self.stats.now().saturating_sub(start);
        }

        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    /// Summed statement dispatch time.
    response: u64,
    /// Summed statement time including row iteration.
    elapsed: u64,
    /// Rows seen while iterating.
    rows: u64,
}

/// Bind one generated value positionally, dispatching on its runtime type.
/// The `Any` driver has no date codec, so dates travel as ISO-8601 text.
fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Int(v) => query.bind(v),
        Value::Long(v) => query.bind(v),
        Value::Str(v) => query.bind(v),
        Value::Bool(v) => query.bind(v),
        Value::Date(v) => query.bind(v.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

fn record_rollback(stats: &Stats, deadlock: bool) {
    stats.incr(if deadlock {
        stats::ABORT_DEADLOCK
    } else {
        stats::ABORT_CONFLICT
    });
}

/// How the run loop responds to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    /// A transaction-rollback condition: count it and move on.
    Rollback { deadlock: bool },
    /// The connection died under us; the pool hands out a replacement.
    Transient,
    /// No usable connection could be obtained; retried with backoff.
    Connect,
    /// Anything else ends the worker.
    Fatal,
}

impl Failure {
    pub(crate) fn classify(err: &sqlx::Error) -> Failure {
        match err {
            sqlx::Error::Database(db) => Self::from_db_parts(db.code().as_deref(), db.message()),
            sqlx::Error::Io(_) => Failure::Transient,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Failure::Connect,
            _ => Failure::Fatal,
        }
    }

    /// SQLSTATE class 40 is a rollback condition; 08001/08004 mean a
    /// connection could not be established; the rest of class 08 is a
    /// connection dying under us. Backends without SQLSTATE still get their
    /// deadlocks counted by the error-text fallback.
    pub(crate) fn from_db_parts(code: Option<&str>, message: &str) -> Failure {
        let deadlock = message.to_lowercase().contains("deadlock");
        match code {
            Some(code) if code.starts_with("40") => Failure::Rollback { deadlock },
            Some("08001") | Some("08004") => Failure::Connect,
            Some(code) if code.starts_with("08") => Failure::Transient,
            _ if deadlock => Failure::Rollback { deadlock: true },
            _ => Failure::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_class_splits_on_deadlock_text() {
        assert_eq!(
            Failure::from_db_parts(Some("40001"), "deadlock detected"),
            Failure::Rollback { deadlock: true }
        );
        assert_eq!(
            Failure::from_db_parts(Some("40001"), "could not serialize access"),
            Failure::Rollback { deadlock: false }
        );
        assert_eq!(
            Failure::from_db_parts(Some("40P01"), "Deadlock found"),
            Failure::Rollback { deadlock: true }
        );
    }

    #[test]
    fn connection_classes_split_on_establishment() {
        assert_eq!(
            Failure::from_db_parts(Some("08001"), "could not connect"),
            Failure::Connect
        );
        assert_eq!(
            Failure::from_db_parts(Some("08004"), "rejected"),
            Failure::Connect
        );
        assert_eq!(
            Failure::from_db_parts(Some("08006"), "connection failure"),
            Failure::Transient
        );
        assert_eq!(
            Failure::from_db_parts(Some("08003"), "connection does not exist"),
            Failure::Transient
        );
    }

    #[test]
    fn deadlock_text_without_sqlstate_still_counts() {
        assert_eq!(
            Failure::from_db_parts(None, "Deadlock found when trying to get lock"),
            Failure::Rollback { deadlock: true }
        );
    }

    #[test]
    fn everything_else_is_fatal() {
        assert_eq!(
            Failure::from_db_parts(Some("42601"), "syntax error"),
            Failure::Fatal
        );
        assert_eq!(Failure::from_db_parts(None, "no such table"), Failure::Fatal);
        assert_eq!(
            Failure::classify(&sqlx::Error::PoolTimedOut),
            Failure::Connect
        );
        assert_eq!(
            Failure::classify(&sqlx::Error::RowNotFound),
            Failure::Fatal
        );
    }

    #[test]
    fn io_errors_are_transient() {
        let err = sqlx::Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(Failure::classify(&err), Failure::Transient);
    }

    #[test]
    fn rollbacks_land_in_the_right_slot() {
        let stats = Stats::new();
        record_rollback(&stats, true);
        record_rollback(&stats, false);
        record_rollback(&stats, false);
        assert_eq!(stats.get(stats::ABORT_DEADLOCK), 1);
        assert_eq!(stats.get(stats::ABORT_CONFLICT), 2);
    }
}
