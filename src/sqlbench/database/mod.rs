//! Database abstraction seam
//!
//! The workload core never touches a driver directly. It consumes a
//! `Database` (executes one parameterized query) obtained from a
//! `DatabaseFlavor` (knows how to build a DSN, vet a query up front, and
//! classify a driver error by code). Swapping databases means swapping
//! flavors; the scheduler and statistics pipeline stay untouched.

mod error_counts;
mod sql;

pub use error_counts::ErrorCounts;
pub use sql::{flavor_for, SUPPORTED_FLAVORS};

use async_trait::async_trait;
use std::sync::Arc;

use crate::sqlbench::error::BenchResult;
use crate::sqlbench::output::SafeCsvWriter;

/// Driver-level error as surfaced by a `Database` implementation.
pub type DbError = Box<dyn std::error::Error + Send + Sync>;

/// The user-specified parameters for connecting to a database. Any empty
/// field means no preference; the flavor substitutes its own default.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Driver-specific `key=value` pairs appended to the DSN verbatim.
    pub params: String,
}

/// Connection pool sizing, shared by every job and worker.
#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub max_idle_conns: u32,
    pub max_active_conns: u32,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_idle_conns: 100,
            max_active_conns: 0,
        }
    }
}

impl PoolLimits {
    /// The pool's hard connection cap. Zero `max_active_conns` means
    /// "no explicit cap"; the idle budget then bounds the pool, which
    /// keeps connection churn down under bursty jobs.
    pub fn connection_cap(&self) -> u32 {
        if self.max_active_conns > 0 {
            self.max_active_conns
        } else {
            self.max_idle_conns
        }
    }
}

/// An instance of a queryable database, e.g. a live connection pool.
///
/// Implementations pool connections internally, so `run_query` is safe to
/// call from arbitrarily many tasks concurrently.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run one query with positional string arguments, returning the
    /// number of rows affected (for reads: the number of rows returned).
    ///
    /// When `results` is set, every returned row is appended to it as a
    /// CSV record with SQL NULLs rendered as `\N`.
    async fn run_query(
        &self,
        results: Option<&SafeCsvWriter>,
        query: &str,
        args: &[String],
    ) -> Result<u64, DbError>;

    /// Close the database, reclaiming any resources. Calling `run_query`
    /// after `close` is illegal.
    async fn close(&self);
}

/// An abstract flavor of database; for example "postgres" or "mysql".
#[async_trait]
pub trait DatabaseFlavor: Send + Sync {
    /// Connect using `cc`, falling back to flavor defaults for any unset
    /// field.
    async fn connect(
        &self,
        cc: &ConnectionConfig,
        limits: PoolLimits,
    ) -> BenchResult<Arc<dyn Database>>;

    /// Validate that a query can run on this flavor. Connection-affecting
    /// statements are rejected because the pool multiplexes connections.
    /// Returns `BenchError::EmptyQuery` for whitespace-only input.
    fn check_query(&self, query: &str) -> BenchResult<()>;

    /// Separator between queries in a query file.
    fn query_separator(&self) -> &str;

    /// Extract the driver's error-code string from a query error.
    ///
    /// Failure here means the driver surfaced something that is not a
    /// database error at all; callers treat that as fatal
    /// misconfiguration.
    fn error_code(&self, err: &DbError) -> BenchResult<String>;
}
