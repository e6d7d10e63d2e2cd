use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use sqlbench::sqlbench::config::parse_config;
use sqlbench::sqlbench::database::{flavor_for, ConnectionConfig, PoolLimits, SUPPORTED_FLAVORS};
use sqlbench::sqlbench::error::{BenchError, BenchResult};
use sqlbench::sqlbench::harness::{run_workload, ReportOptions};
use sqlbench::sqlbench::output::SafeCsvWriter;

/// Drive a configurable SQL workload described by a run file.
#[derive(Parser, Debug)]
#[command(name = "sqlbench", version, about)]
struct Args {
    /// Run file describing the workload (INI format)
    config: PathBuf,

    /// Database driver to use
    #[arg(long, default_value = "mysql")]
    driver: String,

    /// Database connection username
    #[arg(long, default_value = "")]
    username: String,

    /// Database connection password
    #[arg(long, default_value = "")]
    password: String,

    /// Database connection host
    #[arg(long, default_value = "")]
    host: String,

    /// Database connection port (0 = driver default)
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Database to use
    #[arg(long, default_value = "")]
    database: String,

    /// Extra driver parameters appended to the DSN (key=value&...)
    #[arg(long, default_value = "")]
    params: String,

    /// Base directory for relative paths in the run file
    /// (default: the run file's directory)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Maximum idle database connections
    #[arg(long, default_value_t = 100)]
    max_idle_conns: u32,

    /// Maximum active database connections (0 = no explicit cap)
    #[arg(long, default_value_t = 0)]
    max_active_conns: u32,

    /// Confidence level for latency intervals
    #[arg(long, default_value_t = 0.99)]
    confidence: f64,

    /// Interval between intermediate stats reports
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    intermediate_stats_interval: Duration,

    /// Show intermediate stats while the workload runs
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    intermediate_stats: bool,

    /// Log per-invocation stats to this CSV file
    #[arg(long)]
    query_stats_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> BenchResult<()> {
    let flavor = flavor_for(&args.driver).ok_or_else(|| {
        BenchError::config(
            format!(
                "invalid driver {:?} (supported: {})",
                args.driver,
                SUPPORTED_FLAVORS.join(", ")
            ),
            None,
        )
    })?;

    let config = parse_config(Arc::clone(&flavor), &args.config, args.base_dir.as_deref())?;
    log::info!("{}", config);

    let connection = ConnectionConfig {
        username: args.username,
        password: args.password,
        host: args.host,
        port: args.port,
        database: args.database,
        params: args.params,
    };
    let limits = PoolLimits {
        max_idle_conns: args.max_idle_conns,
        max_active_conns: args.max_active_conns,
    };
    let db = flavor.connect(&connection, limits).await?;

    let query_stats = args
        .query_stats_file
        .map(|p| SafeCsvWriter::create(&p).map(Arc::new))
        .transpose()?;
    let opts = ReportOptions {
        confidence: args.confidence,
        interval: args.intermediate_stats_interval,
        intermediate: args.intermediate_stats,
        query_stats,
    };

    run_workload(config, db, opts).await?;
    Ok(())
}
