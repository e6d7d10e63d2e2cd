//! Shared CSV sinks
//!
//! Workers on many tasks append to the same query-results file, and the
//! result processor appends to the query-stats file; both go through
//! `SafeCsvWriter`, which serializes access with an internal lock.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use crate::sqlbench::error::{BenchError, BenchResult};

/// Literal used for SQL NULL values in result output.
pub const NULL_FIELD: &str = "\\N";

/// A CSV writer safe to share across tasks.
///
/// `write` and `flush` each hold the lock for the duration of the
/// operation, so interleaved records from concurrent workers stay whole.
pub struct SafeCsvWriter {
    path: String,
    writer: Mutex<csv::Writer<File>>,
}

impl SafeCsvWriter {
    /// Create (truncating) the file at `path`.
    pub fn create(path: &Path) -> BenchResult<Self> {
        let display = path.display().to_string();
        let file = File::create(path).map_err(|e| BenchError::io(&display, e))?;
        Ok(Self {
            path: display,
            writer: Mutex::new(csv::Writer::from_writer(file)),
        })
    }

    pub fn write<I, T>(&self, record: I) -> BenchResult<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut writer = self.writer.lock().expect("csv writer lock poisoned");
        writer
            .write_record(record)
            .map_err(|e| BenchError::io(&self.path, e))
    }

    pub fn flush(&self) -> BenchResult<()> {
        let mut writer = self.writer.lock().expect("csv writer lock poisoned");
        writer.flush().map_err(|e| BenchError::io(&self.path, e))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_writers_keep_records_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let writer = Arc::new(SafeCsvWriter::create(&path).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let writer = Arc::clone(&writer);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    writer
                        .write([format!("job{}", t), i.to_string(), "ok".to_string()])
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            assert_eq!(line.split(',').count(), 3);
        }
    }
}
