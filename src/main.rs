use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use sqldrive::config::{help_text, Config, Opt, Properties};
use sqldrive::{DataTable, Engine};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Fatal error - exiting: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mut props = Properties::parse_args(env::args().skip(1))?;
    if let Some(path) = props.get(Opt::Config).map(str::to_string) {
        props
            .merge_file(&path)
            .with_context(|| format!("loading config file {path}"))?;
    }
    props.resolve_variables();

    // RUST_LOG wins; otherwise the -logging option supplies the filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(props.get(Opt::Logging).unwrap_or("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if props.flag(Opt::Check) {
        println!("Properties set: {props}");
    }
    if props.flag(Opt::Help) {
        println!("{}", help_text());
        return Ok(());
    }

    let config = Config::from_props(&props)?;

    let data = match &config.data {
        Some(path) => Arc::new(
            DataTable::load(path)
                .with_context(|| format!("loading data file {}", path.display()))?,
        ),
        None => Arc::new(DataTable::default()),
    };

    let report = Engine::builder().config(config).data(data).build().run().await?;
    tracing::debug!(ops = report.op_count, "run complete");
    Ok(())
}
