//! Result aggregation and reporting
//!
//! A single processor consumes the merged result stream. Every result
//! updates two aggregates for its job: the all-time aggregate (with
//! latency histograms) that becomes the final report, and a recent
//! window that is logged and reset on each tick of the intermediate
//! stats interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::sqlbench::config::Config;
use crate::sqlbench::job::JobResult;
use crate::sqlbench::output::SafeCsvWriter;
use crate::sqlbench::stats::{StreamingHistogram, StreamingStats};

/// Reporting knobs, fed from the CLI.
#[derive(Clone)]
pub struct ReportOptions {
    /// Confidence level for latency intervals.
    pub confidence: f64,
    /// Intermediate stats interval.
    pub interval: Duration,
    /// Whether intermediate stats are logged at all.
    pub intermediate: bool,
    /// Optional per-invocation stats CSV sink.
    pub query_stats: Option<Arc<SafeCsvWriter>>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            confidence: 0.99,
            interval: Duration::from_secs(1),
            intermediate: true,
            query_stats: None,
        }
    }
}

/// Running aggregate over one job's results: latency moments split into
/// transactions (clean invocations) and aborts (invocations with
/// accepted errors), plus row/query/error counters and the observed
/// [start, stop] window.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobAggregate {
    transactions: StreamingStats,
    aborts: StreamingStats,
    queries: u64,
    rows_affected: u64,
    total_errors: u64,
    accepted_errors: u64,
    start: Duration,
    stop: Duration,
}

impl JobAggregate {
    pub fn update(&mut self, config: &Config, result: &JobResult) {
        self.accepted_errors += result.errors.total_accepted(&config.accepted_errors);

        let errors = result.errors.total_errors();
        self.total_errors += errors;
        let elapsed_nanos = result.elapsed.as_nanos() as f64;
        if errors > 0 {
            self.aborts.add(elapsed_nanos);
        } else {
            self.rows_affected += result.rows_affected;
            self.transactions.add(elapsed_nanos);
        }
        self.queries += result.queries as u64;

        if self.start.is_zero() || result.start < self.start {
            self.start = result.start;
        }
        let end = result.start + result.elapsed;
        if self.stop.is_zero() || end > self.stop {
            self.stop = end;
        }
    }

    pub fn transactions(&self) -> &StreamingStats {
        &self.transactions
    }

    pub fn aborts(&self) -> &StreamingStats {
        &self.aborts
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn queries(&self) -> u64 {
        self.queries
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }

    pub fn accepted_errors(&self) -> u64 {
        self.accepted_errors
    }

    /// One-line report over the aggregate's window.
    pub fn report(&self, confidence: f64) -> String {
        let window = (self.stop.saturating_sub(self.start)).as_secs_f64();
        let rate = |count: u64| {
            if window > 0.0 {
                count as f64 / window
            } else {
                0.0
            }
        };

        let invocations = self.transactions.count() + self.aborts.count();
        let abort_pct = if invocations > 0 {
            100.0 * self.aborts.count() as f64 / invocations as f64
        } else {
            0.0
        };

        format!(
            "{} transactions ({:.3} TPS), latency {}; {} rows ({:.3} RPS), {} queries ({:.3} QPS); {} aborts ({:.2}%), latency {}",
            self.transactions.count(),
            rate(self.transactions.count()),
            latency_interval(&self.transactions, confidence),
            self.rows_affected,
            rate(self.rows_affected),
            self.queries,
            rate(self.queries),
            self.aborts.count(),
            abort_pct,
            latency_interval(&self.aborts, confidence),
        )
    }
}

fn latency_interval(stats: &StreamingStats, confidence: f64) -> String {
    let mean = Duration::from_nanos(stats.mean().max(0.0) as u64);
    let ci = Duration::from_nanos(stats.confidence(confidence).max(0.0) as u64);
    format!("{:?}\u{b1}{:?}", mean, ci)
}

/// All-time statistics for one job: the aggregate plus per-kind latency
/// histograms.
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    aggregate: JobAggregate,
    transaction_latencies: StreamingHistogram,
    abort_latencies: StreamingHistogram,
}

impl JobStats {
    pub fn update(&mut self, config: &Config, result: &JobResult) {
        self.aggregate.update(config, result);

        let nanos = result.elapsed.as_nanos() as u64;
        if result.errors.total_errors() > 0 {
            self.abort_latencies.add(nanos);
        } else {
            self.transaction_latencies.add(nanos);
        }

        // Anything outside the accepted set means the workload is not
        // doing what the operator thinks it is; stop and say so.
        let unhandled = result.errors.unhandled(&config.accepted_errors);
        if !unhandled.is_empty() {
            log::error!("{}: unexpected database errors:\n{}", result.name, unhandled);
            std::process::exit(1);
        }
    }

    pub fn aggregate(&self) -> &JobAggregate {
        &self.aggregate
    }

    pub fn transaction_latencies(&self) -> &StreamingHistogram {
        &self.transaction_latencies
    }

    pub fn abort_latencies(&self) -> &StreamingHistogram {
        &self.abort_latencies
    }

    pub fn report(&self, confidence: f64) -> String {
        self.aggregate.report(confidence)
    }
}

/// Consume the merged result stream until it closes, returning the
/// all-time stats per job. The recent window flushes to the log on every
/// tick of the configured interval.
pub async fn process_results(
    config: &Config,
    mut results: mpsc::Receiver<JobResult>,
    opts: &ReportOptions,
) -> HashMap<String, JobStats> {
    let mut all_time: HashMap<String, JobStats> = HashMap::new();
    let mut recent: HashMap<String, JobAggregate> = HashMap::new();

    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + opts.interval,
        opts.interval,
    );
    // A stalled consumer should not replay a burst of empty reports.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = results.recv() => match received {
                Some(result) => {
                    if let Some(sink) = &opts.query_stats {
                        log_query_stats(sink, &result);
                    }
                    all_time
                        .entry(result.name.clone())
                        .or_default()
                        .update(config, &result);
                    recent
                        .entry(result.name.clone())
                        .or_default()
                        .update(config, &result);
                }
                None => {
                    if let Some(sink) = &opts.query_stats {
                        if let Err(e) = sink.flush() {
                            log::warn!("could not flush query stats: {}", e);
                        }
                    }
                    return all_time;
                }
            },
            _ = ticker.tick(), if opts.intermediate => {
                for (name, aggregate) in &recent {
                    log::info!("{}: {}", name, aggregate.report(opts.confidence));
                }
                recent.clear();
            }
        }
    }
}

fn log_query_stats(sink: &SafeCsvWriter, result: &JobResult) {
    let record = [
        result.name.clone(),
        result.start.as_micros().to_string(),
        result.elapsed.as_micros().to_string(),
        result.rows_affected.to_string(),
        result.errors.total_errors().to_string(),
    ];
    if let Err(e) = sink.write(record) {
        log::warn!("could not log query stats: {}", e);
    }
}
