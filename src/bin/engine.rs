//! # Ruleflow Engine Daemon
//!
//! Loads a compiled artifact and runs the cyclic evaluator with
//! sentinel-aware active/standby management.
//!
//! ## Usage
//!
//! ```bash
//! ruleflow-engine --artifact artifact/ --config config.yaml
//! ```
//!
//! Shuts down gracefully on Ctrl-C; normal shutdown exits 0, start-up
//! failures exit non-zero.

use clap::Parser;
use ruleflow::config::Config;
use ruleflow::engine::{RuleEngine, Scheduler};
use ruleflow::store::RedisStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ruleflow-engine", version, about = "Ruleflow runtime engine")]
struct Cli {
    /// Artifact directory produced by `ruleflow compile`
    #[arg(short, long, default_value = "artifact")]
    artifact: PathBuf,

    /// System config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for rolling log files (stdout only when unset)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(&path.display().to_string())?,
        None => Config::load()?,
    };

    // Keep the non-blocking writer guard alive for the process lifetime.
    let _guard = init_logging(&config, cli.log_dir.as_deref());

    info!(
        artifact = %cli.artifact.display(),
        host = %config.host_id(),
        "starting ruleflow engine"
    );

    let store = Arc::new(RedisStore::connect(&config.store).await?);
    let cancel = CancellationToken::new();
    let health_task = store.start_health_task(cancel.clone());

    let engine = Arc::new(RuleEngine::from_artifact(
        &cli.artifact,
        store,
        config.engine.worker_threads,
        Duration::from_secs(config.store.error_throttle_window_s),
    )?);
    info!(
        rules = engine.plan().rules.len(),
        groups = engine.plan().groups.len(),
        layers = engine.plan().layer_count(),
        "plan loaded"
    );

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&engine), &config, cancel.clone()));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });

    scheduler.run().await;
    let _ = health_task.await;

    let stats = engine.stats();
    info!(
        cycles = stats.cycles_completed,
        fired = stats.rules_fired,
        flush_failures = stats.flush_failures,
        "engine stopped"
    );
    Ok(())
}

fn init_logging(
    config: &Config,
    log_dir: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ruleflow-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if config.logging.format == "json" {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.logging.format == "json" {
                tracing_subscriber::fmt().with_env_filter(filter).json().init();
            } else {
                tracing_subscriber::fmt().with_env_filter(filter).init();
            }
            None
        }
    }
}
