//! kete binary entry point.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kete::config::{Args, BUILD_DATE, COMMIT, Config, VERSION};
use kete::k8s::KubeConnector;
use kete::orchestrator::{Orchestrator, RunReport};
use kete::provider::ProviderCache;
use kete::report::DirectorySink;

const REPORT_FILE: &str = "report.json";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level, &args.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting kete v{} (commit: {}, build: {})",
        VERSION, COMMIT, BUILD_DATE
    );

    match run(args).await {
        Ok(report) if report.cancelled => std::process::exit(130),
        Ok(report) if !report.passed() => std::process::exit(1),
        Ok(_) => {}
        Err(e) => {
            error!("Run failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize the tracing subscriber. JSON unless `format` is `text`.
fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    match format {
        "text" | "pretty" => fmt().with_env_filter(filter).with_target(false).init(),
        "json" => fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        other => anyhow::bail!("Invalid log format '{other}', expected json or text"),
    }

    Ok(())
}

async fn run(args: Args) -> Result<RunReport> {
    let config = Config::from_args(args)?;

    let providers = ProviderCache::new();
    let provider = providers.get_or_create(&config.provider)?;
    info!(
        provider = %provider.name(),
        environment = %provider.environment(),
        "Using cluster provider"
    );

    let sink = Arc::new(DirectorySink::new(config.report_dir.clone()));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received SIGINT, cancelling run and tearing down");
            signal_cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        provider,
        Arc::new(KubeConnector),
        sink,
        config.orchestrator,
        cancel,
    );
    let report = orchestrator.run().await;

    write_report(&config.report_dir, &report).await?;
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    for failure in &report.errors {
        error!(step = %failure.step, "{}", failure.message);
    }
    Ok(report)
}

async fn write_report(dir: &std::path::Path, report: &RunReport) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(REPORT_FILE);
    tokio::fs::write(&path, serde_json::to_vec_pretty(report)?).await?;
    info!("Wrote run report to {}", path.display());
    Ok(())
}
