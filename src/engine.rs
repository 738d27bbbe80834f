//! The engine supervisor.
//!
//! Owns the run: parses the statement template, builds the shared pool,
//! constructs every worker (so setup errors are fatal before anything
//! starts), then releases them and the monitor through a common start
//! barrier and waits for the deadline to play out.

use std::sync::Arc;

use futures::future::join_all;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use tokio::sync::Barrier;
use tracing::{debug, error, info};
use typed_builder::TypedBuilder;

use crate::config::Config;
use crate::data::DataTable;
use crate::error::Result;
use crate::monitor::Monitor;
use crate::report::FinalReport;
use crate::stats::Stats;
use crate::template::StatementTemplate;
use crate::worker::SqlWorker;

#[derive(TypedBuilder)]
pub struct Engine {
    config: Config,
    #[builder(default)]
    data: Arc<DataTable>,
}

impl Engine {
    /// Run the workload to its deadline and return the final summary.
    pub async fn run(self) -> Result<FinalReport> {
        let config = self.config;

        let template = StatementTemplate::parse(&config.sql, config.params.as_deref())?;
        debug!(sql = template.sql(), verb = %template.verb(), "statement rewritten");

        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.threads as u32)
            .connect(&config.datasource_url())
            .await?;

        let stats = Arc::new(Stats::new());
        let barrier = Arc::new(Barrier::new(config.threads + 1));

        // construct every task before spawning any, so a bad generator spec
        // fails the run instead of stranding tasks at the barrier
        let mut workers = Vec::with_capacity(config.threads);
        for id in 0..config.threads {
            workers.push(SqlWorker::new(
                id,
                pool.clone(),
                Arc::clone(&barrier),
                Arc::clone(&stats),
                &template,
                &self.data,
                &config,
            )?);
        }
        let monitor = Monitor::new(
            Arc::clone(&stats),
            Arc::clone(&barrier),
            config.duration(),
            config.report_period(),
            config.threads,
        );

        let worker_tasks: Vec<_> = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run()))
            .collect();
        let monitor_task = tokio::spawn(monitor.run());

        info!(
            threads = config.threads,
            time = config.time,
            batch = config.batch,
            "workload running"
        );

        for joined in join_all(worker_tasks).await {
            if let Err(err) = joined {
                error!(%err, "worker task panicked");
            }
        }
        let report = monitor_task
            .await
            .unwrap_or_else(|_| FinalReport::from_snapshot(&stats.snapshot(), config.threads));

        pool.close().await;
        Ok(report)
    }
}
