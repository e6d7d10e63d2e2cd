//! Library for driving configurable SQL workloads
//!
//! This library provides a multi-job workload driver: an INI run file
//! describes named jobs, each job paces parameterized SQL invocations
//! against a shared connection pool, and a single result processor
//! aggregates per-invocation timings into streaming statistics.

pub mod sqlbench;

// Re-export main API
pub use sqlbench::{
    config::Config,
    database::{flavor_for, ConnectionConfig, Database, DatabaseFlavor, ErrorCounts},
    error::{BenchError, BenchResult},
    harness::{run_workload, ReportOptions},
    job::{Job, JobResult},
    results::JobStats,
    stats::{StreamingHistogram, StreamingStats},
};
