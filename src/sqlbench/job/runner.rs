//! Job execution
//!
//! One runner per job: it waits out the job's start delay, then pulls
//! invocations from the source and hands each to a spawned worker,
//! bounded by the job's queue depth. Workers execute against the shared
//! database and push one `JobResult` each onto the job's result stream;
//! all job streams merge through `merge_results` into the single channel
//! the result processor consumes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::sqlbench::database::{Database, DatabaseFlavor, ErrorCounts};
use crate::sqlbench::job::{Job, JobInvocation, JobResult};
use crate::sqlbench::output::SafeCsvWriter;

impl Job {
    /// Drive this job to completion: honor the stop deadline and start
    /// delay, then run the invocation loop. The job's file handles are
    /// released exactly once, when this future returns.
    pub async fn run(
        mut self,
        ctx: CancellationToken,
        db: Arc<dyn Database>,
        flavor: Arc<dyn DatabaseFlavor>,
        t0: Instant,
        results: mpsc::Sender<JobResult>,
    ) {
        log::info!("starting {}", self.name);

        // A stop deadline becomes a child scope cancelled by a timer, so
        // everything below observes one token either way.
        let mut _stop_guard = None;
        let ctx = if !self.stop.is_zero() {
            let child = ctx.child_token();
            let timer = child.clone();
            let stop = self.stop;
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer.cancelled() => {}
                    _ = tokio::time::sleep(stop) => timer.cancel(),
                }
            });
            // Cancel the timer task when the job finishes early.
            _stop_guard = Some(child.clone().drop_guard());
            child
        } else {
            ctx
        };

        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = tokio::time::sleep(self.start) => {
                self.run_loop(ctx, db, flavor, t0, results).await;
            }
        }

        log::info!("stopping {}", self.name);
    }

    async fn run_loop(
        &mut self,
        ctx: CancellationToken,
        db: Arc<dyn Database>,
        flavor: Arc<dyn DatabaseFlavor>,
        t0: Instant,
        results: mpsc::Sender<JobResult>,
    ) {
        let gate = if self.queue_depth > 0 {
            Some(Arc::new(Semaphore::new(self.queue_depth as usize)))
        } else {
            None
        };
        let results_sink = self.query_results.clone();
        let mut invocations = self.start_invocation_source(ctx.clone());
        let mut workers: JoinSet<()> = JoinSet::new();

        while let Some(invocation) = invocations.recv().await {
            let permit = match &gate {
                Some(gate) => {
                    let acquired = tokio::select! {
                        _ = ctx.cancelled() => break,
                        acquired = Arc::clone(gate).acquire_owned() => acquired,
                    };
                    Some(acquired.expect("gate semaphore closed"))
                }
                None => None,
            };

            let db = Arc::clone(&db);
            let flavor = Arc::clone(&flavor);
            let results = results.clone();
            let results_sink = results_sink.clone();
            let start_offset = t0.elapsed();
            workers.spawn(async move {
                let result =
                    invoke(&*db, &*flavor, &invocation, start_offset, results_sink.as_deref())
                        .await;
                drop(permit);
                // The processor may already be gone on teardown; results
                // are best-effort past that point.
                let _ = results.send(result).await;
            });
        }

        // Do not return until every spawned worker has completed, so the
        // merged results channel cannot close while sends are pending.
        while workers.join_next().await.is_some() {}
    }
}

/// Execute one invocation: every query in order, one args row each.
/// Failed queries contribute no rows but the invocation still produces a
/// single result carrying the error counts.
async fn invoke(
    db: &dyn Database,
    flavor: &dyn DatabaseFlavor,
    invocation: &JobInvocation,
    start: Duration,
    results_sink: Option<&SafeCsvWriter>,
) -> JobResult {
    let mut elapsed = Duration::ZERO;
    let mut rows_affected = 0u64;
    let mut errors = ErrorCounts::new();

    for (i, query) in invocation.queries.iter().enumerate() {
        let query_start = Instant::now();
        let outcome = db.run_query(results_sink, query, invocation.args_for(i)).await;
        elapsed += query_start.elapsed();

        match outcome {
            Ok(rows) => rows_affected += rows,
            Err(err) => {
                if let Err(meta) = errors.add(&err, query, flavor) {
                    // The driver produced something the flavor cannot
                    // classify; nothing downstream can account for it.
                    log::error!(
                        "{}: unclassifiable error for query '{}': {}",
                        invocation.name,
                        query,
                        meta
                    );
                    std::process::exit(1);
                }
            }
        }
    }

    if !errors.is_empty() {
        rows_affected = 0;
    }

    JobResult {
        name: invocation.name.clone(),
        start,
        elapsed,
        queries: invocation.queries.len(),
        rows_affected,
        errors,
    }
}

/// Spawn a runner per job and merge all their result streams.
pub fn start_jobs(
    jobs: HashMap<String, Job>,
    ctx: CancellationToken,
    db: Arc<dyn Database>,
    flavor: Arc<dyn DatabaseFlavor>,
    t0: Instant,
) -> mpsc::Receiver<JobResult> {
    let mut streams = Vec::with_capacity(jobs.len());
    for (_, job) in jobs {
        let (tx, rx) = mpsc::channel(1);
        streams.push(rx);
        tokio::spawn(job.run(ctx.clone(), Arc::clone(&db), Arc::clone(&flavor), t0, tx));
    }
    merge_results(streams)
}

/// Fan every per-job stream into one channel.
///
/// One forwarder per input pumps into the merged channel; the channel
/// closes exactly once, after the last forwarder finishes and drops its
/// sender. The buffer holds two results per job so a slow consumer does
/// not immediately head-of-line block fast producers.
pub fn merge_results(inputs: Vec<mpsc::Receiver<JobResult>>) -> mpsc::Receiver<JobResult> {
    let (tx, rx) = mpsc::channel(2 * inputs.len().max(1));

    tokio::spawn(async move {
        let mut forwarders: JoinSet<()> = JoinSet::new();
        for mut input in inputs {
            let tx = tx.clone();
            forwarders.spawn(async move {
                while let Some(result) = input.recv().await {
                    if tx.send(result).await.is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx);
        while forwarders.join_next().await.is_some() {}
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlbench::database::{ConnectionConfig, DbError, PoolLimits};
    use crate::sqlbench::error::{BenchError, BenchResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Database that sleeps per query and tracks concurrent callers.
    struct MockDatabase {
        delay: Duration,
        rows: u64,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        fail_queries_containing: Option<&'static str>,
    }

    impl MockDatabase {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                rows: 1,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                fail_queries_containing: None,
            }
        }
    }

    #[async_trait]
    impl Database for MockDatabase {
        async fn run_query(
            &self,
            _results: Option<&SafeCsvWriter>,
            query: &str,
            _args: &[String],
        ) -> Result<u64, DbError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(needle) = self.fail_queries_containing {
                if query.contains(needle) {
                    return Err("mock query failure".to_string().into());
                }
            }
            Ok(self.rows)
        }

        async fn close(&self) {}
    }

    /// Flavor whose error code is always "MOCK".
    struct MockFlavor;

    #[async_trait]
    impl DatabaseFlavor for MockFlavor {
        async fn connect(
            &self,
            _cc: &ConnectionConfig,
            _limits: PoolLimits,
        ) -> BenchResult<Arc<dyn Database>> {
            Err(BenchError::connection("mock flavor does not connect"))
        }

        fn check_query(&self, _query: &str) -> BenchResult<()> {
            Ok(())
        }

        fn query_separator(&self) -> &str {
            ";"
        }

        fn error_code(&self, _err: &DbError) -> BenchResult<String> {
            Ok("MOCK".to_string())
        }
    }

    fn job(count: u64, queue_depth: u64) -> Job {
        Job {
            name: "worker-test".to_string(),
            queries: vec!["select 1".to_string()],
            query_log: None,
            query_args: None,
            query_results: None,
            queue_depth,
            rate: 0.0,
            batch_size: 0,
            count,
            start: Duration::ZERO,
            stop: Duration::ZERO,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<JobResult>) -> Vec<JobResult> {
        let mut out = Vec::new();
        while let Some(r) = rx.recv().await {
            out.push(r);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_in_flight_workers() {
        let db = Arc::new(MockDatabase::new(Duration::from_millis(20)));
        let (tx, rx) = mpsc::channel(32);

        job(10, 2)
            .run(
                CancellationToken::new(),
                Arc::clone(&db) as Arc<dyn Database>,
                Arc::new(MockFlavor),
                Instant::now(),
                tx,
            )
            .await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 10);
        assert!(db.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_channel_closes_after_workers_drain() {
        let db = Arc::new(MockDatabase::new(Duration::from_millis(5)));
        let (tx, rx) = mpsc::channel(32);

        let handle = tokio::spawn(job(4, 1).run(
            CancellationToken::new(),
            db as Arc<dyn Database>,
            Arc::new(MockFlavor),
            Instant::now(),
            tx,
        ));

        let results = collect(rx).await;
        assert_eq!(results.len(), 4);
        for r in &results {
            assert_eq!(r.rows_affected, 1);
            assert_eq!(r.queries, 1);
            assert!(r.errors.is_empty());
        }
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_query_reports_errors_not_rows() {
        let mut db = MockDatabase::new(Duration::from_millis(1));
        db.fail_queries_containing = Some("boom");
        let db = Arc::new(db);
        let (tx, rx) = mpsc::channel(8);

        let mut failing = job(2, 1);
        failing.queries = vec!["select boom".to_string()];
        failing
            .run(
                CancellationToken::new(),
                db as Arc<dyn Database>,
                Arc::new(MockFlavor),
                Instant::now(),
                tx,
            )
            .await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 2);
        for r in &results {
            assert_eq!(r.rows_affected, 0);
            assert_eq!(r.errors.total_errors(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_quiesces() {
        let db = Arc::new(MockDatabase::new(Duration::from_millis(2)));
        let (tx, rx) = mpsc::channel(32);
        let ctx = CancellationToken::new();

        // Unlimited count: only cancellation ends the job.
        let handle = tokio::spawn(job(0, 4).run(
            ctx.clone(),
            db as Arc<dyn Database>,
            Arc::new(MockFlavor),
            Instant::now(),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();

        // After cancellation the stream must close in bounded time with
        // every in-flight worker accounted for.
        let results = tokio::time::timeout(Duration::from_secs(5), collect(rx))
            .await
            .expect("results stream did not close after cancel");
        assert!(!results.is_empty());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_deadline_ends_job() {
        let db = Arc::new(MockDatabase::new(Duration::from_millis(1)));
        let (tx, rx) = mpsc::channel(32);

        let mut bounded = job(0, 1);
        bounded.stop = Duration::from_millis(30);
        let started = tokio::time::Instant::now();
        bounded
            .run(
                CancellationToken::new(),
                db as Arc<dyn Database>,
                Arc::new(MockFlavor),
                Instant::now(),
                tx,
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        let results = collect(rx).await;
        assert!(!results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_delay_defers_first_invocation() {
        let db = Arc::new(MockDatabase::new(Duration::ZERO));
        let (tx, mut rx) = mpsc::channel(8);

        let mut delayed = job(1, 1);
        delayed.start = Duration::from_millis(40);
        let started = tokio::time::Instant::now();
        let handle = tokio::spawn(delayed.run(
            CancellationToken::new(),
            db as Arc<dyn Database>,
            Arc::new(MockFlavor),
            Instant::now(),
            tx,
        ));

        assert!(rx.recv().await.is_some());
        assert!(started.elapsed() >= Duration::from_millis(40));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_results_closes_after_all_inputs() {
        let mut streams = Vec::new();
        for i in 0..3 {
            let (tx, rx) = mpsc::channel(1);
            streams.push(rx);
            tokio::spawn(async move {
                for _ in 0..5 {
                    let result = JobResult {
                        name: format!("job{}", i),
                        start: Duration::ZERO,
                        elapsed: Duration::from_micros(10),
                        queries: 1,
                        rows_affected: 1,
                        errors: ErrorCounts::new(),
                    };
                    if tx.send(result).await.is_err() {
                        return;
                    }
                }
            });
        }

        let merged = collect(merge_results(streams)).await;
        assert_eq!(merged.len(), 15);
    }
}
