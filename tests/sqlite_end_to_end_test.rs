//! Full-stack run against a real SQLite database
//!
//! Exercises the sqlx-backed flavor end to end: setup, one counted job
//! with a results sink, final stats, and teardown.

use std::sync::Arc;

use sqlbench::sqlbench::config::parse_config_text;
use sqlbench::sqlbench::database::{flavor_for, ConnectionConfig, PoolLimits};
use sqlbench::sqlbench::harness::{run_workload, ReportOptions};

#[tokio::test]
async fn test_setup_job_teardown_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("bench.db");
    std::fs::File::create(&db_path).unwrap();

    let flavor = flavor_for("sqlite").unwrap();
    let connection = ConnectionConfig {
        database: db_path.display().to_string(),
        ..ConnectionConfig::default()
    };
    let db = flavor
        .connect(&connection, PoolLimits::default())
        .await
        .unwrap();

    let config = parse_config_text(
        Arc::clone(&flavor),
        "[setup]\n\
         query=create table t(a int)\n\
         query=insert into t values(1),(2),(3)\n\
         [teardown]\n\
         query=drop table t\n\
         [count-rows]\n\
         query=select count(*) from t\n\
         count=1\n\
         query-results-file=rows.csv\n",
        dir.path(),
    )
    .unwrap();

    let opts = ReportOptions {
        intermediate: false,
        ..ReportOptions::default()
    };
    let stats = run_workload(config, db, opts).await.unwrap();

    // One invocation; a count(*) returns exactly one row.
    let job = stats["count-rows"].aggregate();
    assert_eq!(job.transactions().count(), 1);
    assert_eq!(job.rows_affected(), 1);
    assert_eq!(job.queries(), 1);
    assert_eq!(job.total_errors(), 0);

    // The results sink captured the single row with its value.
    let rows = std::fs::read_to_string(dir.path().join("rows.csv")).unwrap();
    assert_eq!(rows.trim(), "3");

    // Teardown dropped the table: a fresh connection no longer sees it.
    let db = flavor
        .connect(&connection, PoolLimits::default())
        .await
        .unwrap();
    let err = db
        .run_query(None, "select count(*) from t", &[])
        .await
        .unwrap_err();
    assert!(flavor.error_code(&err).is_ok());
    db.close().await;
}

#[tokio::test]
async fn test_write_queries_report_rows_affected() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("writes.db");
    std::fs::File::create(&db_path).unwrap();

    let flavor = flavor_for("sqlite").unwrap();
    let connection = ConnectionConfig {
        database: db_path.display().to_string(),
        ..ConnectionConfig::default()
    };
    let db = flavor
        .connect(&connection, PoolLimits::default())
        .await
        .unwrap();

    let config = parse_config_text(
        Arc::clone(&flavor),
        "[setup]\nquery=create table w(a int)\n\
         [writer]\nquery=insert into w values(1)\ncount=4\n\
         [teardown]\nquery=drop table w\n",
        dir.path(),
    )
    .unwrap();

    let opts = ReportOptions {
        intermediate: false,
        ..ReportOptions::default()
    };
    let stats = run_workload(config, db, opts).await.unwrap();

    let writer = stats["writer"].aggregate();
    assert_eq!(writer.transactions().count(), 4);
    // Each insert affects one row.
    assert_eq!(writer.rows_affected(), 4);
}
