//! Jobs and their execution artifacts
//!
//! A `Job` is the immutable description parsed from one run-file section.
//! At run time it unfolds into a lazy stream of `JobInvocation`s (see
//! `source`), each of which a worker executes into one `JobResult`
//! (see `runner`).

pub mod runner;
pub mod source;

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use crate::sqlbench::database::ErrorCounts;
use crate::sqlbench::output::SafeCsvWriter;

/// One named workload component, immutable after parsing.
///
/// The `query_log`, `query_args` and `query_results` handles are uniquely
/// owned by the job and released when the job finishes.
pub struct Job {
    pub name: String,
    /// Ordered query texts; more than one only in multi-query mode.
    pub queries: Vec<String>,
    /// Replay log of `<microseconds>,<query>` records; mutually exclusive
    /// with `queries` and `query_args`.
    pub query_log: Option<File>,
    /// CSV source of positional parameters, one row per query text per
    /// invocation.
    pub query_args: Option<csv::Reader<File>>,
    /// Sink for rows returned by read queries.
    pub query_results: Option<Arc<SafeCsvWriter>>,
    /// Maximum simultaneous in-flight invocations; zero means unbounded.
    pub queue_depth: u64,
    /// Batches released per second; zero disables rate pacing.
    pub rate: f64,
    /// Invocations released per rate tick.
    pub batch_size: u64,
    /// Maximum invocations (or log lines) to consume; zero means
    /// unlimited.
    pub count: u64,
    /// Delay after the run starts before this job begins.
    pub start: Duration,
    /// Deadline after the run starts past which this job stops.
    pub stop: Duration,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Job{{name: {:?}", self.name)?;
        if !self.queries.is_empty() {
            let quoted: Vec<String> = self.queries.iter().map(|q| format!("{:?}", q)).collect();
            write!(f, ", queries: [{}]", quoted.join(", "))?;
        }
        if self.query_log.is_some() {
            write!(f, ", query-log: set")?;
        }
        if self.query_args.is_some() {
            write!(f, ", query-args: set")?;
        }
        if self.query_results.is_some() {
            write!(f, ", query-results: set")?;
        }
        if self.queue_depth > 0 {
            write!(f, ", queue-depth: {}", self.queue_depth)?;
        }
        if self.rate > 0.0 {
            write!(f, ", rate: {}, batch-size: {}", self.rate, self.batch_size)?;
        }
        if self.count > 0 {
            write!(f, ", count: {}", self.count)?;
        }
        if !self.start.is_zero() {
            write!(f, ", start: {}", humantime::format_duration(self.start))?;
        }
        if !self.stop.is_zero() {
            write!(f, ", stop: {}", humantime::format_duration(self.stop))?;
        }
        write!(f, "}}")
    }
}

/// One execution of a job: the job's queries run in order on shared
/// connection-pool time, with one row of positional arguments per query.
#[derive(Debug, Clone)]
pub struct JobInvocation {
    pub name: String,
    pub queries: Vec<String>,
    /// One argument row per query; empty when the job has no args source.
    pub args: Vec<Vec<String>>,
}

impl JobInvocation {
    pub fn new(name: &str, queries: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            queries,
            args: Vec::new(),
        }
    }

    /// Argument row for the query at `index`, empty when none configured.
    pub fn args_for(&self, index: usize) -> &[String] {
        self.args.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Timing record emitted once per invocation.
#[derive(Debug)]
pub struct JobResult {
    pub name: String,
    /// Offset of the invocation's start from the run's T0.
    pub start: Duration,
    pub elapsed: Duration,
    /// Number of queries attempted in the invocation.
    pub queries: usize,
    /// Zero if any query in the invocation failed.
    pub rows_affected: u64,
    pub errors: ErrorCounts,
}
