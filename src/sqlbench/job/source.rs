//! Lazy invocation sources
//!
//! Each job unfolds into a stream of invocations produced by a spawned
//! task and consumed by the job runner. The pacing discipline is chosen
//! from the job description: a rate turns into a strict ticker releasing
//! batches, a query log replays at its recorded timestamps, and
//! otherwise invocations flow as fast as the consumer takes them (up to
//! `count`). Every blocking send and sleep races the cancellation token,
//! and the channel closes when the source task returns.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sqlbench::job::{Job, JobInvocation};

impl Job {
    /// Spawn this job's invocation source, taking ownership of the
    /// query-log / query-args handles. The receiver yields invocations
    /// in source order until count, end-of-input, or cancellation.
    pub(crate) fn start_invocation_source(
        &mut self,
        ctx: CancellationToken,
    ) -> mpsc::Receiver<Arc<JobInvocation>> {
        let (tx, rx) = mpsc::channel(1);
        let name = self.name.clone();
        let queries = self.queries.clone();
        let count = self.count;

        if self.rate > 0.0 {
            let rate = self.rate;
            let batch_size = self.batch_size;
            let args = self.query_args.take();
            tokio::spawn(run_ticked(
                name, queries, args, count, rate, batch_size, ctx, tx,
            ));
        } else if let Some(log) = self.query_log.take() {
            tokio::spawn(run_replay(name, log, count, ctx, tx));
        } else {
            let args = self.query_args.take();
            tokio::spawn(run_counted(name, queries, args, count, ctx, tx));
        }
        rx
    }
}

/// Emit invocations as fast as the consumer takes them, up to `count`
/// (zero = unlimited) or until the args source runs dry.
async fn run_counted(
    name: String,
    queries: Vec<String>,
    mut args: Option<csv::Reader<File>>,
    count: u64,
    ctx: CancellationToken,
    tx: mpsc::Sender<Arc<JobInvocation>>,
) {
    // Without args every invocation is identical; share one allocation.
    let shared = if args.is_none() {
        Some(Arc::new(JobInvocation::new(&name, queries.clone())))
    } else {
        None
    };

    let mut emitted = 0u64;
    while count == 0 || emitted < count {
        let invocation = match &shared {
            Some(ji) => Arc::clone(ji),
            None => match next_invocation(&name, &queries, args.as_mut().expect("args reader")) {
                Ok(Some(ji)) => Arc::new(ji),
                Ok(None) => return,
                Err(e) => {
                    log::error!("{}: query args read error: {}", name, e);
                    return;
                }
            },
        };

        tokio::select! {
            _ = ctx.cancelled() => return,
            sent = tx.send(invocation) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        emitted += 1;
    }
}

/// Release one batch per tick of a strict ticker at `rate` batches per
/// second. A slow consumer backs ticks up rather than dropping them.
#[allow(clippy::too_many_arguments)]
async fn run_ticked(
    name: String,
    queries: Vec<String>,
    mut args: Option<csv::Reader<File>>,
    count: u64,
    rate: f64,
    batch_size: u64,
    ctx: CancellationToken,
    tx: mpsc::Sender<Arc<JobInvocation>>,
) {
    let period = Duration::from_secs_f64(1.0 / rate);
    // First tick after one full period, like a wall-clock ticker.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    let shared = if args.is_none() {
        Some(Arc::new(JobInvocation::new(&name, queries.clone())))
    } else {
        None
    };

    let mut ticks = 0u64;
    while count == 0 || ticks < count {
        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let invocation = match &shared {
            Some(ji) => Arc::clone(ji),
            None => match next_invocation(&name, &queries, args.as_mut().expect("args reader")) {
                Ok(Some(ji)) => Arc::new(ji),
                Ok(None) => return,
                Err(e) => {
                    log::error!("{}: query args read error: {}", name, e);
                    return;
                }
            },
        };

        for _ in 0..batch_size {
            tokio::select! {
                _ = ctx.cancelled() => return,
                sent = tx.send(Arc::clone(&invocation)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        ticks += 1;
    }
}

/// Replay a query log of `<microseconds>,<query>` records, sleeping on
/// the delta between consecutive timestamps. The first record is the
/// anchor and emits immediately, so absolute and relative timestamps
/// behave identically.
async fn run_replay(
    name: String,
    log: File,
    count: u64,
    ctx: CancellationToken,
    tx: mpsc::Sender<Arc<JobInvocation>>,
) {
    let reader = BufReader::new(log);
    let mut last_micros = 0u64;
    let mut lines = 0u64;

    for line in reader.lines() {
        if count != 0 && lines >= count {
            return;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("{}: query log read error on line {}: {}", name, lines + 1, e);
                return;
            }
        };

        // Only the first comma separates; query text may contain commas.
        let (timestamp, query) = match line.split_once(',') {
            Some(parts) => parts,
            None => {
                log::error!("{}: invalid query log on line {}", name, lines + 1);
                return;
            }
        };
        let micros = match timestamp.parse::<u64>() {
            Ok(micros) => micros,
            Err(e) => {
                log::error!(
                    "{}: error parsing query log time on line {}: {}",
                    name,
                    lines + 1,
                    e
                );
                return;
            }
        };

        let time_to_sleep = if lines > 0 {
            Duration::from_micros(micros.saturating_sub(last_micros))
        } else {
            Duration::ZERO
        };
        last_micros = micros;

        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = tokio::time::sleep(time_to_sleep) => {}
        }

        // TODO(source): support multi-statement log records.
        let invocation = Arc::new(JobInvocation::new(&name, vec![query.to_string()]));
        tokio::select! {
            _ = ctx.cancelled() => return,
            sent = tx.send(invocation) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        lines += 1;
    }
}

/// Build the next invocation by pulling one args row per query text.
/// `Ok(None)` signals a clean end of the args source.
fn next_invocation(
    name: &str,
    queries: &[String],
    reader: &mut csv::Reader<File>,
) -> Result<Option<JobInvocation>, csv::Error> {
    let mut args = Vec::with_capacity(queries.len());
    let mut record = csv::StringRecord::new();
    for _ in queries {
        if !reader.read_record(&mut record)? {
            return Ok(None);
        }
        args.push(record.iter().map(str::to_string).collect());
    }
    Ok(Some(JobInvocation {
        name: name.to_string(),
        queries: queries.to_vec(),
        args,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn job(queries: &[&str]) -> Job {
        Job {
            name: "test".to_string(),
            queries: queries.iter().map(|q| q.to_string()).collect(),
            query_log: None,
            query_args: None,
            query_results: None,
            queue_depth: 1,
            rate: 0.0,
            batch_size: 0,
            count: 0,
            start: Duration::ZERO,
            stop: Duration::ZERO,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Arc<JobInvocation>>) -> Vec<Arc<JobInvocation>> {
        let mut out = Vec::new();
        while let Some(inv) = rx.recv().await {
            out.push(inv);
        }
        out
    }

    #[tokio::test]
    async fn test_counted_mode_respects_count() {
        let mut job = job(&["select 1"]);
        job.count = 3;

        let rx = job.start_invocation_source(CancellationToken::new());
        let emitted = drain(rx).await;
        assert_eq!(emitted.len(), 3);
        assert_eq!(emitted[0].queries, vec!["select 1"]);
    }

    #[tokio::test]
    async fn test_counted_mode_ends_with_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alpha,1").unwrap();
        writeln!(file, "beta,2").unwrap();
        file.flush().unwrap();

        let mut job = job(&["select concat(?, ?)"]);
        job.query_args = Some(
            csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(file.path())
                .unwrap(),
        );

        let rx = job.start_invocation_source(CancellationToken::new());
        let emitted = drain(rx).await;
        // Two rows of args, so exactly two invocations and a clean stop.
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].args_for(0), ["alpha", "1"]);
        assert_eq!(emitted[1].args_for(0), ["beta", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticked_mode_emits_batches_on_schedule() {
        let mut job = job(&["select 1"]);
        job.rate = 10.0;
        job.batch_size = 5;
        job.count = 5;

        let started = tokio::time::Instant::now();
        let rx = job.start_invocation_source(CancellationToken::new());
        let emitted = drain(rx).await;

        assert_eq!(emitted.len(), 25);
        // Five ticks at 10 batches/sec span about half a second.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "span was {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(700), "span was {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_mode_sleeps_on_deltas() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0,select 1").unwrap();
        writeln!(file, "2000,select 2").unwrap();
        file.flush().unwrap();

        let mut job = job(&[]);
        job.query_log = Some(File::open(file.path()).unwrap());

        let started = tokio::time::Instant::now();
        let mut rx = job.start_invocation_source(CancellationToken::new());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.queries, vec!["select 1"]);
        let first_at = started.elapsed();

        let second = rx.recv().await.unwrap();
        assert_eq!(second.queries, vec!["select 2"]);
        let second_at = started.elapsed();

        assert!(first_at < Duration::from_millis(1));
        assert!(second_at >= Duration::from_millis(2));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_replay_keeps_commas_in_query_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0,select a, b, c from t").unwrap();
        file.flush().unwrap();

        let mut job = job(&[]);
        job.query_log = Some(File::open(file.path()).unwrap());

        let emitted = drain(job.start_invocation_source(CancellationToken::new())).await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].queries, vec!["select a, b, c from t"]);
    }

    #[tokio::test]
    async fn test_replay_malformed_line_ends_job() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0,select 1").unwrap();
        writeln!(file, "not a record").unwrap();
        writeln!(file, "500,select 2").unwrap();
        file.flush().unwrap();

        let mut job = job(&[]);
        job.query_log = Some(File::open(file.path()).unwrap());

        let emitted = drain(job.start_invocation_source(CancellationToken::new())).await;
        assert_eq!(emitted.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_closes_stream() {
        let mut job = job(&["select 1"]);
        let ctx = CancellationToken::new();
        let mut rx = job.start_invocation_source(ctx.clone());

        assert!(rx.recv().await.is_some());
        ctx.cancel();

        // A cancelled source stops sending and drops its end; the small
        // channel buffer may still hold a couple of invocations.
        let drained =
            tokio::time::timeout(Duration::from_secs(1), async { drain(rx).await }).await;
        assert!(drained.is_ok(), "source did not close after cancellation");
    }
}
