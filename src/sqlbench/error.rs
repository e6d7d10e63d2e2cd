use std::fmt;

/// Errors that can occur while parsing a run file or driving a workload
#[derive(Debug)]
pub enum BenchError {
    /// Run-file parsing and validation errors
    ConfigError {
        message: String,
        section: Option<String>,
    },

    /// Failure to reach or authenticate against the database
    ConnectionError { message: String },

    /// A setup or teardown query failed, or a query was rejected up front
    QueryError { query: String, message: String },

    /// File access errors (query files, args files, log files, CSV sinks)
    IoError { path: String, message: String },

    /// Driver-level misbehavior, e.g. an error the flavor cannot classify
    DriverError { message: String },

    /// A query with no content; callers filter this when splitting files
    EmptyQuery,
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::ConfigError { message, section } => {
                if let Some(section) = section {
                    write!(f, "config error in section '{}': {}", section, message)
                } else {
                    write!(f, "config error: {}", message)
                }
            }
            BenchError::ConnectionError { message } => {
                write!(f, "connection error: {}", message)
            }
            BenchError::QueryError { query, message } => {
                write!(f, "error for query '{}': {}", query, message)
            }
            BenchError::IoError { path, message } => {
                write!(f, "io error on {}: {}", path, message)
            }
            BenchError::DriverError { message } => {
                write!(f, "driver error: {}", message)
            }
            BenchError::EmptyQuery => write!(f, "empty query found"),
        }
    }
}

impl std::error::Error for BenchError {}

impl BenchError {
    /// Create a config error scoped to a section
    pub fn config(message: impl Into<String>, section: Option<String>) -> Self {
        BenchError::ConfigError {
            message: message.into(),
            section,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        BenchError::ConnectionError {
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(query: impl Into<String>, message: impl Into<String>) -> Self {
        BenchError::QueryError {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Create an io error tagged with the offending path
    pub fn io(path: impl Into<String>, err: impl fmt::Display) -> Self {
        BenchError::IoError {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a driver error
    pub fn driver(message: impl Into<String>) -> Self {
        BenchError::DriverError {
            message: message.into(),
        }
    }
}

/// Result type for workload operations
pub type BenchResult<T> = Result<T, BenchError>;
