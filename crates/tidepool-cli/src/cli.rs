//! `tidepool` - drive and inspect a bounded connection pool
//!
//! ```bash
//! # Validate a config file and print the effective settings
//! tidepool --config tidepool.example.toml check-config
//!
//! # 32 workers for 10 seconds against the simulated backend
//! tidepool --config tidepool.example.toml run --workers 32 --duration-ms 10000
//! ```

mod logging;
mod report;
mod settings;
mod sim;
mod workload;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tidepool_connection::{ConnectionPool, DriverFactory, maintenance};
use tokio::sync::watch;

use crate::logging::{LogFormat, LoggingConfig};
use crate::report::RunReport;
use crate::settings::Settings;
use crate::sim::SimulatedDriver;
use crate::workload::WorkloadConfig;

#[derive(Parser)]
#[command(name = "tidepool")]
#[command(about = "Bounded connection pool load driver")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true, env = "TIDEPOOL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Verbose logging (debug level for the pool crates)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Warm up a pool over the simulated backend and put it under load
    Run(RunArgs),

    /// Load and validate the configuration, then print it as JSON
    CheckConfig(SizeOverrides),
}

#[derive(Args, Debug, Default, Clone, Copy)]
struct SizeOverrides {
    /// Override the configured minimum pool size
    #[arg(long)]
    min: Option<usize>,

    /// Override the configured maximum pool size
    #[arg(long)]
    max: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of concurrent workers
    #[arg(short, long, default_value = "16")]
    workers: usize,

    /// How long to run, in milliseconds
    #[arg(long, default_value = "5000")]
    duration_ms: u64,

    /// Share of operations that are single writes
    #[arg(long, default_value = "0.3")]
    write_ratio: f64,

    /// Share of operations that are two-statement transactions
    #[arg(long, default_value = "0.1")]
    transaction_ratio: f64,

    /// Print the final report as JSON instead of tables
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    sizes: SizeOverrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = if cli.verbose {
        LoggingConfig::verbose(cli.log_format)
    } else {
        LoggingConfig::default().with_format(cli.log_format)
    };
    logging::init(logging)?;

    match cli.command {
        Commands::Run(args) => run(cli.config, args).await,
        Commands::CheckConfig(sizes) => check_config(cli.config, sizes),
    }
}

fn load_settings(path: Option<PathBuf>, sizes: SizeOverrides) -> Result<Settings> {
    let settings = match &path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Settings::default(),
    };
    let settings = settings.with_size_overrides(sizes.min, sizes.max);
    settings.validate().context("invalid configuration")?;
    Ok(settings)
}

fn check_config(path: Option<PathBuf>, sizes: SizeOverrides) -> Result<()> {
    let settings = load_settings(path, sizes)?;
    let json = serde_json::to_string_pretty(&settings.redacted())
        .context("failed to serialize configuration")?;
    println!("{}", json);
    Ok(())
}

async fn run(path: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let settings = load_settings(path, args.sizes)?;
    let ratios_ok = (0.0..=1.0).contains(&args.write_ratio)
        && (0.0..=1.0).contains(&args.transaction_ratio)
        && args.write_ratio + args.transaction_ratio <= 1.0;
    if !ratios_ok {
        bail!("--write-ratio and --transaction-ratio must be within 0..=1 and sum to at most 1");
    }

    let pool_config = settings.pool.clone();
    let factory = DriverFactory::new(
        SimulatedDriver::new(),
        pool_config.connection().clone(),
        pool_config.connect_timeout(),
    );
    let pool = Arc::new(ConnectionPool::new(pool_config, factory));

    let warmed = pool.warm_up().await;
    tracing::info!(warmed, "pool ready");

    let maintenance = maintenance::spawn(pool.clone(), settings.maintenance.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted; finishing in-flight operations");
            let _ = stop_tx.send(true);
        }
    });

    let workload = WorkloadConfig {
        workers: args.workers.max(1),
        duration: Duration::from_millis(args.duration_ms),
        acquire_timeout: settings.pool.acquire_timeout(),
        write_ratio: args.write_ratio,
        transaction_ratio: args.transaction_ratio,
        ..Default::default()
    };
    let summary = workload::run(pool.clone(), &workload, stop_rx).await;
    ctrl_c.abort();

    maintenance.stop().await;

    let report = RunReport {
        workload: summary,
        stats: pool.stats(),
        metrics: pool.performance_metrics(),
    };
    pool.shutdown().await;

    if args.json {
        println!("{}", report.to_json().context("failed to serialize report")?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}
