//! Workload orchestration
//!
//! `run_workload` is the whole lifecycle: setup queries, a cancellable
//! deadline shared by every job, the merged result stream and its
//! processor, the final report, and teardown. Teardown runs even when
//! the workload was interrupted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::sqlbench::config::Config;
use crate::sqlbench::database::Database;
use crate::sqlbench::error::{BenchError, BenchResult};
use crate::sqlbench::job::runner;
use crate::sqlbench::results::{self, JobStats};

pub use crate::sqlbench::results::ReportOptions;

/// Run the configured workload against `db` and return the final
/// per-job statistics.
pub async fn run_workload(
    mut config: Config,
    db: Arc<dyn Database>,
    opts: ReportOptions,
) -> BenchResult<HashMap<String, JobStats>> {
    run_queries("setup", &config.setup, &*db).await?;

    let root = CancellationToken::new();
    spawn_interrupt_handler(root.clone());

    let workload_ctx = root.child_token();
    if !config.duration.is_zero() {
        let deadline = workload_ctx.clone();
        let duration = config.duration;
        tokio::spawn(async move {
            tokio::select! {
                _ = deadline.cancelled() => {}
                _ = tokio::time::sleep(duration) => deadline.cancel(),
            }
        });
    }

    let t0 = Instant::now();
    let jobs = std::mem::take(&mut config.jobs);
    let results = runner::start_jobs(
        jobs,
        workload_ctx.clone(),
        Arc::clone(&db),
        Arc::clone(&config.flavor),
        t0,
    );

    // Blocks until every job has quiesced and the merged stream closes.
    let stats = results::process_results(&config, results, &opts).await;
    workload_ctx.cancel();

    log_final_stats(&stats, opts.confidence);

    // Teardown runs regardless of how the workload ended; without it the
    // database is left in a state the next run cannot assume.
    let teardown = run_queries("teardown", &config.teardown, &*db).await;
    db.close().await;
    teardown?;

    Ok(stats)
}

async fn run_queries(phase: &str, queries: &[String], db: &dyn Database) -> BenchResult<()> {
    if queries.is_empty() {
        return Ok(());
    }
    log::info!("performing {}", phase);
    for query in queries {
        db.run_query(None, query, &[])
            .await
            .map_err(|e| BenchError::query(query, e.to_string()))?;
    }
    Ok(())
}

fn log_final_stats(stats: &HashMap<String, JobStats>, confidence: f64) {
    let mut names: Vec<&String> = stats.keys().collect();
    names.sort();

    for name in names {
        let job = &stats[name];
        log::info!("{}: {}", name, job.report(confidence));
        log::info!(
            "{}: transaction latencies:\n{}",
            name,
            job.transaction_latencies().render()
        );
        if job.aggregate().aborts().count() > 0 {
            log::info!(
                "{}: abort latencies:\n{}",
                name,
                job.abort_latencies().render()
            );
        }
    }
}

/// Translate the first SIGINT into cancellation, exactly once; a second
/// interrupt force-exits instead of waiting for quiesce.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::info!("interrupt: stopping jobs");
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
