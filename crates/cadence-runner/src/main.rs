mod interval;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cadence_core::CadenceConfig;
use cadence_scheduler::{Scheduler, TaskRun};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::interval::{IntervalTask, RunLimits};

/// Cadence - run config-declared recurring tasks on a polling scheduler
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the scheduler and run until Ctrl-C
    Run {
        /// Stop on our own after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Print the resolved configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let fallback = if cli.verbose {
        "cadence=debug,cadence_scheduler=debug"
    } else {
        "cadence=info,cadence_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .init();

    // explicit --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli.config.or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref())
        .inspect_err(|e| error!(code = e.code(), error = %e, "config load failed"))
        .with_context(|| {
            format!("loading config {}", config_path.as_deref().unwrap_or("(default path)"))
        })?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run { duration_secs } => run(config, duration_secs.map(Duration::from_secs)).await,
    }
}

async fn run(config: CadenceConfig, duration: Option<Duration>) -> Result<()> {
    if config.tasks.is_empty() {
        warn!("no [[tasks]] configured, the scheduler will idle");
    }

    let limits = RunLimits::from_config(&config.tasks);
    let scheduler = Scheduler::<IntervalTask>::builder()
        .with_config(&config.scheduler)
        .with_stop_strategy(limits)
        .build();

    scheduler.on_task_completed(|run: &TaskRun<IntervalTask>| {
        if let Some(e) = run.failure() {
            warn!(task_id = %run.task_id(), error = %e, "interval task failed");
        }
    });

    scheduler.start()?;
    info!(
        tasks = config.tasks.len(),
        poll_interval_ms = scheduler.poll_interval().as_millis() as u64,
        "cadence runner started"
    );

    for task in &config.tasks {
        let task = Arc::new(IntervalTask::from_config(task));
        match scheduler.schedule(task) {
            Some(run_id) => info!(run_id = %run_id, "interval task scheduled"),
            None => warn!("interval task declined its first run"),
        }
    }

    match duration {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => info!(secs = limit.as_secs(), "run duration elapsed"),
                res = tokio::signal::ctrl_c() => res.context("waiting for Ctrl-C")?,
            }
        }
        None => tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?,
    }

    info!(
        pending = scheduler.pending(),
        next_due = ?scheduler.next_due(),
        "shutting down"
    );
    scheduler.stop()?;
    Ok(())
}
