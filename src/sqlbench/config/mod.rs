//! Run-file parsing and validation
//!
//! A run file is INI-shaped: `[global]` options (or options before any
//! section header), `[setup]` and `[teardown]` query lists, and one
//! section per job. Decoding opens every file handle a job needs up
//! front, so a misconfigured run fails before any query is issued.

mod ini;

pub use ini::{RawConfig, RawSection};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::sqlbench::database::DatabaseFlavor;
use crate::sqlbench::error::{BenchError, BenchResult};
use crate::sqlbench::job::Job;
use crate::sqlbench::output::SafeCsvWriter;

/// Section names that can never be jobs.
pub const RESERVED_SECTIONS: &[&str] = &["setup", "teardown", "global"];

/// A parsed run description, read-only during execution.
pub struct Config {
    /// When the run stops launching new invocations; zero means
    /// "until interrupted".
    pub duration: Duration,
    pub setup: Vec<String>,
    pub teardown: Vec<String>,
    pub jobs: HashMap<String, Job>,
    /// Driver error codes that count as aborts instead of ending the run.
    pub accepted_errors: HashSet<String>,
    pub flavor: Arc<dyn DatabaseFlavor>,
}

/// Parse the run file at `path`. Relative paths inside the file resolve
/// against `base_dir` when given, else against the file's own directory.
pub fn parse_config(
    flavor: Arc<dyn DatabaseFlavor>,
    path: &Path,
    base_dir: Option<&Path>,
) -> BenchResult<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| BenchError::io(path.display().to_string(), e))?;
    let base = base_dir
        .map(Path::to_path_buf)
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    parse_config_text(flavor, &text, &base)
}

/// Parse run-file text directly; used by `parse_config` and tests.
pub fn parse_config_text(
    flavor: Arc<dyn DatabaseFlavor>,
    text: &str,
    base_dir: &Path,
) -> BenchResult<Config> {
    let raw = RawConfig::parse(text)?;

    let mut config = Config {
        duration: Duration::ZERO,
        setup: Vec::new(),
        teardown: Vec::new(),
        jobs: HashMap::new(),
        accepted_errors: HashSet::new(),
        flavor,
    };

    if let Some(global) = raw.section("global") {
        decode_global_section(global, &mut config)?;
    }
    if let Some(setup) = raw.section("setup") {
        config.setup = decode_query_section(&*config.flavor, setup, base_dir)?;
    }
    if let Some(teardown) = raw.section("teardown") {
        config.teardown = decode_query_section(&*config.flavor, teardown, base_dir)?;
    }

    for section in raw.sections() {
        if RESERVED_SECTIONS.contains(&section.name.as_str()) {
            continue;
        }
        let job = decode_job_section(&*config.flavor, section, base_dir)
            .map_err(|e| match e {
                BenchError::ConfigError { message, .. } => {
                    BenchError::config(message, Some(section.name.clone()))
                }
                other => other,
            })?;
        config.jobs.insert(section.name.clone(), job);
    }

    validate_schedule(&config)?;
    Ok(config)
}

fn decode_global_section(section: &RawSection, config: &mut Config) -> BenchResult<()> {
    let mut unique = UniqueTracker::new(&section.name);
    for (key, value) in &section.entries {
        match key.as_str() {
            "duration" => {
                unique.claim(key)?;
                config.duration = parse_duration(value, &section.name)?;
            }
            "error" => {
                config.accepted_errors.insert(value.clone());
            }
            other => return Err(unknown_option(other, &section.name)),
        }
    }
    Ok(())
}

fn decode_query_section(
    flavor: &dyn DatabaseFlavor,
    section: &RawSection,
    base_dir: &Path,
) -> BenchResult<Vec<String>> {
    let mut queries = Vec::new();
    for (key, value) in &section.entries {
        match key.as_str() {
            "query" => {
                flavor.check_query(value)?;
                queries.push(value.clone());
            }
            "query-file" => {
                queries.extend(read_queries_from_file(flavor, &resolve(base_dir, value))?)
            }
            other => return Err(unknown_option(other, &section.name)),
        }
    }
    Ok(queries)
}

fn decode_job_section(
    flavor: &dyn DatabaseFlavor,
    section: &RawSection,
    base_dir: &Path,
) -> BenchResult<Job> {
    let name = &section.name;
    let mut unique = UniqueTracker::new(name);

    let mut queries: Vec<String> = Vec::new();
    let mut query_log_path: Option<PathBuf> = None;
    let mut args_path: Option<PathBuf> = None;
    let mut args_delim: Option<u8> = None;
    let mut results_path: Option<PathBuf> = None;
    let mut multi_query_allowed = false;
    let mut queue_depth = 0u64;
    let mut rate = 0f64;
    let mut batch_size = 0u64;
    let mut count = 0u64;
    let mut start = Duration::ZERO;
    let mut stop = Duration::ZERO;

    for (key, value) in &section.entries {
        match key.as_str() {
            "start" => {
                unique.claim(key)?;
                start = parse_duration(value, name)?;
            }
            "stop" => {
                unique.claim(key)?;
                stop = parse_duration(value, name)?;
            }
            "query" => {
                flavor.check_query(value)?;
                queries.push(value.clone());
            }
            "query-file" => {
                queries.extend(read_queries_from_file(flavor, &resolve(base_dir, value))?)
            }
            "query-args-file" => {
                unique.claim(key)?;
                args_path = Some(resolve(base_dir, value));
            }
            "query-args-delim" => {
                unique.claim(key)?;
                args_delim = Some(parse_delimiter(value, name)?);
            }
            "query-results-file" => {
                unique.claim(key)?;
                results_path = Some(resolve(base_dir, value));
            }
            "query-log-file" => {
                unique.claim(key)?;
                query_log_path = Some(resolve(base_dir, value));
            }
            "rate" => {
                unique.claim(key)?;
                rate = value.parse::<f64>().map_err(|e| {
                    BenchError::config(format!("invalid rate '{}': {}", value, e), None)
                })?;
                if rate < 0.0 {
                    return Err(BenchError::config("invalid negative value for rate", None));
                }
            }
            "batch-size" => {
                unique.claim(key)?;
                batch_size = parse_u64(key, value)?;
            }
            "queue-depth" | "concurrency" => {
                unique.claim("queue-depth")?;
                queue_depth = parse_u64(key, value)?;
            }
            "count" => {
                unique.claim(key)?;
                count = parse_u64(key, value)?;
            }
            "multi-query-mode" => {
                unique.claim(key)?;
                if value != "multi-connection" {
                    return Err(BenchError::config(
                        format!("invalid value for multi-query-mode: {:?}", value),
                        None,
                    ));
                }
                multi_query_allowed = true;
            }
            other => return Err(unknown_option(other, name)),
        }
    }

    if queries.is_empty() && query_log_path.is_none() {
        return Err(BenchError::config("no query provided", None));
    }
    if !queries.is_empty() && query_log_path.is_some() {
        return Err(BenchError::config(
            "cannot have both queries and a query log",
            None,
        ));
    }
    if queries.len() > 1 && !multi_query_allowed {
        return Err(BenchError::config(
            "must have only one query unless multi-query-mode=multi-connection",
            None,
        ));
    }
    if rate == 0.0 && batch_size > 0 {
        return Err(BenchError::config(
            "can only specify batch-size with rate",
            None,
        ));
    }
    if args_delim.is_some() && args_path.is_none() {
        return Err(BenchError::config(
            "query-args-delim requires query-args-file",
            None,
        ));
    }
    if args_path.is_some() && query_log_path.is_some() {
        return Err(BenchError::config(
            "cannot have query args with a query log",
            None,
        ));
    }

    let pacing_modes =
        usize::from(queue_depth > 0) + usize::from(rate > 0.0) + usize::from(query_log_path.is_some());
    if pacing_modes > 1 {
        return Err(BenchError::config(
            "rate, queue-depth and query-log-file are mutually exclusive",
            None,
        ));
    }

    // If neither the queue depth nor the rate has been set, allow one
    // invocation at a time.
    if queue_depth == 0 && rate == 0.0 && query_log_path.is_none() {
        queue_depth = 1;
    }
    if rate > 0.0 && batch_size == 0 {
        batch_size = 1;
    }

    let query_log = query_log_path
        .map(|p| File::open(&p).map_err(|e| BenchError::io(p.display().to_string(), e)))
        .transpose()?;
    let query_args = args_path
        .map(|p| {
            csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .delimiter(args_delim.unwrap_or(b','))
                .from_path(&p)
                .map_err(|e| BenchError::io(p.display().to_string(), e))
        })
        .transpose()?;
    let query_results = results_path
        .map(|p| SafeCsvWriter::create(&p).map(Arc::new))
        .transpose()?;

    Ok(Job {
        name: name.clone(),
        queries,
        query_log,
        query_args,
        query_results,
        queue_depth,
        rate,
        batch_size,
        count,
        start,
        stop,
    })
}

fn validate_schedule(config: &Config) -> BenchResult<()> {
    if config.duration.is_zero() {
        return Ok(());
    }
    for (name, job) in &config.jobs {
        if job.start > config.duration {
            return Err(BenchError::config(
                format!("job {:?} starts after the run finishes", name),
                None,
            ));
        }
        if !job.stop.is_zero() && job.stop > config.duration {
            return Err(BenchError::config(
                format!("job {:?} stops after the run finishes", name),
                None,
            ));
        }
    }
    Ok(())
}

/// Read queries from a file, split on the flavor's separator; empty
/// fragments (e.g. after a trailing separator) are skipped.
fn read_queries_from_file(flavor: &dyn DatabaseFlavor, path: &Path) -> BenchResult<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BenchError::io(path.display().to_string(), e))?;

    let mut queries = Vec::new();
    for query in contents.split(flavor.query_separator()) {
        match flavor.check_query(query) {
            Ok(()) => queries.push(query.trim().to_string()),
            Err(BenchError::EmptyQuery) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(queries)
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn parse_duration(value: &str, section: &str) -> BenchResult<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        BenchError::config(
            format!("invalid duration '{}': {}", value, e),
            Some(section.to_string()),
        )
    })
}

fn parse_u64(key: &str, value: &str) -> BenchResult<u64> {
    value
        .parse::<u64>()
        .map_err(|e| BenchError::config(format!("invalid {} '{}': {}", key, value, e), None))
}

/// A delimiter is one character, optionally quoted so whitespace and
/// comment characters survive the INI layer; `\t` spells a tab.
fn parse_delimiter(value: &str, section: &str) -> BenchResult<u8> {
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    let unescaped = if unquoted == "\\t" { "\t" } else { unquoted };

    let mut bytes = unescaped.bytes();
    match (bytes.next(), bytes.next()) {
        (Some(b), None) => Ok(b),
        _ => Err(BenchError::config(
            format!("query-args-delim must be a single character, got {:?}", value),
            Some(section.to_string()),
        )),
    }
}

/// Tracks options that may appear at most once per section.
struct UniqueTracker {
    section: String,
    seen: HashSet<String>,
}

impl UniqueTracker {
    fn new(section: &str) -> Self {
        Self {
            section: section.to_string(),
            seen: HashSet::new(),
        }
    }

    fn claim(&mut self, key: &str) -> BenchResult<()> {
        if self.seen.insert(key.to_string()) {
            Ok(())
        } else {
            Err(BenchError::config(
                format!("option '{}' may only appear once", key),
                Some(self.section.clone()),
            ))
        }
    }
}

fn unknown_option(key: &str, section: &str) -> BenchError {
    BenchError::config(
        format!("unknown option '{}'", key),
        Some(section.to_string()),
    )
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Config{{")?;
        let mut wrote = false;
        if !self.duration.is_zero() {
            write!(f, "duration: {}", humantime::format_duration(self.duration))?;
            wrote = true;
        }
        for (label, queries) in [("setup", &self.setup), ("teardown", &self.teardown)] {
            if !queries.is_empty() {
                if wrote {
                    write!(f, ", ")?;
                }
                let quoted: Vec<String> = queries.iter().map(|q| format!("{:?}", q)).collect();
                write!(f, "{}: [{}]", label, quoted.join(", "))?;
                wrote = true;
            }
        }
        if !self.accepted_errors.is_empty() {
            if wrote {
                write!(f, ", ")?;
            }
            let mut codes: Vec<&String> = self.accepted_errors.iter().collect();
            codes.sort();
            write!(f, "accepted-errors: {:?}", codes)?;
            wrote = true;
        }
        if !self.jobs.is_empty() {
            if wrote {
                write!(f, ", ")?;
            }
            let mut names: Vec<&String> = self.jobs.keys().collect();
            names.sort();
            let rendered: Vec<String> =
                names.iter().map(|n| self.jobs[*n].to_string()).collect();
            write!(f, "jobs: [{}]", rendered.join(", "))?;
        }
        write!(f, "}}")
    }
}
