use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::sqlbench::database::{DatabaseFlavor, DbError};
use crate::sqlbench::error::BenchResult;

/// Per-invocation error bookkeeping, keyed by driver error code.
///
/// Errors from arbitrary drivers are not guaranteed to be comparable or
/// hashable, so the map key is the flavor-extracted code string; one
/// representative message per code is kept for diagnostics, with counts
/// broken down by query text.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounts {
    by_code: HashMap<String, CodeCounts>,
}

#[derive(Debug, Clone)]
struct CodeCounts {
    /// Message of the first error seen under this code.
    representative: String,
    per_query: HashMap<String, u64>,
}

impl CodeCounts {
    fn total(&self) -> u64 {
        self.per_query.values().sum()
    }
}

impl ErrorCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Record `err` against `query`, classified by the flavor's error
    /// code. Propagates the meta-error if the flavor cannot classify it.
    pub fn add(&mut self, err: &DbError, query: &str, flavor: &dyn DatabaseFlavor) -> BenchResult<()> {
        let code = flavor.error_code(err)?;
        let counts = self.by_code.entry(code).or_insert_with(|| CodeCounts {
            representative: err.to_string(),
            per_query: HashMap::new(),
        });
        *counts.per_query.entry(query.to_string()).or_insert(0) += 1;
        Ok(())
    }

    pub fn total_errors(&self) -> u64 {
        self.by_code.values().map(CodeCounts::total).sum()
    }

    /// Total over only the codes in the accepted set.
    pub fn total_accepted(&self, accepted: &HashSet<String>) -> u64 {
        self.by_code
            .iter()
            .filter(|(code, _)| accepted.contains(*code))
            .map(|(_, counts)| counts.total())
            .sum()
    }

    /// A copy holding just the codes outside the accepted set.
    pub fn unhandled(&self, accepted: &HashSet<String>) -> ErrorCounts {
        ErrorCounts {
            by_code: self
                .by_code
                .iter()
                .filter(|(code, _)| !accepted.contains(*code))
                .map(|(code, counts)| (code.clone(), counts.clone()))
                .collect(),
        }
    }
}

impl fmt::Display for ErrorCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Errors (with frequency count)")?;
        for counts in self.by_code.values() {
            writeln!(
                f,
                "  ({}x) {}\n    Error occurred while running:",
                counts.total(),
                counts.representative
            )?;

            // Most frequent queries first.
            let mut queries: Vec<(&String, &u64)> = counts.per_query.iter().collect();
            queries.sort_by(|a, b| b.1.cmp(a.1));
            for (query, count) in queries {
                writeln!(f, "    ({}x) {}", count, query)?;
            }
        }
        Ok(())
    }
}
