//! Query execution: retry, error surfacing and result shaping.

mod common;

use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use num_bigint::BigInt;
use pgkit::{ClientConfig, ColumnDef, Dialect, PgKitError, RetryPolicy, Schema, TableDef, Value};

use common::{client_with, row, ScriptedBackend};

fn users_schema() -> Schema {
    Schema::new().table(
        "users",
        TableDef::new()
            .column("userId", ColumnDef::new("BIGINT").named("user_id"))
            .column("createdAt", ColumnDef::new("TIMESTAMPTZ").named("created_at"))
            .column("name", ColumnDef::new("VARCHAR(5)")),
    )
}

fn retrying(max_retries: u32, initial: u64, max: u64) -> ClientConfig {
    ClientConfig::new().retry(RetryPolicy::new(max_retries, initial, max))
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let backend = ScriptedBackend::new();
    backend.push_error(PgKitError::connection_with_code("reset", "ECONNRESET"));
    backend.push_error(PgKitError::connection_with_code("reset", "ECONNRESET"));
    backend.push_rows(vec![row(&[("a", Value::Int(1))])]);
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), retrying(3, 10, 100));

    let start = Instant::now();
    let timed = client.execute_query("SELECT 1 AS a").await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(timed.duration_ms > 30.0);
    assert_eq!(timed.result.rows, vec![row(&[("a", Value::Int(1))])]);
    assert_eq!(timed.result.row_count, Some(1));
    assert_eq!(backend.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_double_from_initial() {
    let backend = ScriptedBackend::new();
    backend.push_error(PgKitError::connection_with_code("reset", "ECONNRESET"));
    backend.push_error(PgKitError::connection_with_code("reset", "ECONNRESET"));
    backend.push_error(PgKitError::connection_with_code("reset", "ECONNRESET"));
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), retrying(3, 10, 25));

    client.execute_query("SELECT 1").await.unwrap();

    let gaps = backend.query_gaps();
    assert_eq!(gaps.len(), 3);
    for (gap, expected) in gaps.iter().zip([10u64, 20, 25]) {
        let expected = Duration::from_millis(expected);
        assert!(*gap >= expected && *gap < expected + Duration::from_millis(2), "{:?}", gaps);
    }
}

#[tokio::test]
async fn test_non_transient_error_is_not_retried() {
    let backend = ScriptedBackend::new();
    backend.push_error(PgKitError::query_with_code(
        "relation \"missing\" does not exist",
        "42P01",
    ));
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), retrying(3, 10, 100));

    let err = client.execute_query("SELECT * FROM missing").await.unwrap_err();

    assert_eq!(backend.query_count(), 1);
    assert!(matches!(err, PgKitError::Query { .. }));
    assert_eq!(err.code(), Some("42P01"));
    assert!(err.to_string().contains("SELECT * FROM missing"));
}

#[tokio::test]
async fn test_exhausted_retries_return_last_error() {
    let backend = ScriptedBackend::new();
    backend.push_error(PgKitError::query_with_code("deadlock", "40P01"));
    backend.push_error(PgKitError::query_with_code("deadlock", "40P01"));
    backend.push_error(PgKitError::query_with_code("serialization", "40001"));
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), retrying(2, 1, 5));

    let err = client.execute_query("UPDATE t SET a = 1").await.unwrap_err();

    assert_eq!(backend.query_count(), 3);
    assert_eq!(err.code(), Some("40001"));
}

#[tokio::test]
async fn test_no_retry_policy_makes_one_attempt() {
    let backend = ScriptedBackend::new();
    backend.push_error(PgKitError::connection_with_code("reset", "ECONNRESET"));
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    assert!(client.execute_query("SELECT 1").await.is_err());
    assert_eq!(backend.query_count(), 1);
}

#[tokio::test]
async fn test_cause_code_is_classified() {
    let backend = ScriptedBackend::new();
    backend.push_error(PgKitError::query("wrapped").with_cause_code("57P01"));
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), retrying(1, 1, 5));

    client.execute_query("SELECT 1").await.unwrap();
    assert_eq!(backend.query_count(), 2);
}

#[tokio::test]
async fn test_empty_sql_never_reaches_driver() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    for sql in ["", "   ", "\n\t"] {
        let err = client.execute_query(sql).await.unwrap_err();
        assert!(matches!(err, PgKitError::Connection { .. }));
    }
    assert_eq!(backend.query_count(), 0);
    assert_eq!(backend.init_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_select_translates_rows_through_mapping() {
    let backend = ScriptedBackend::new();
    backend.push_rows(vec![row(&[
        ("user_id", Value::Text("10".into())),
        ("created_at", Value::Text("2024-01-02T03:04:05Z".into())),
    ])]);
    let (client, _registry) = client_with(backend, Dialect::Postgres, users_schema(), ClientConfig::new());

    let result = client
        .execute_select("SELECT * FROM users", Some("users"))
        .await
        .unwrap();

    let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get("userId"), Some(&Value::BigInt(BigInt::from(10))));
    assert_eq!(result.rows[0].get("createdAt"), Some(&Value::Timestamp(created)));
    assert_eq!(result.metadata.command, "SELECT");
    assert_eq!(result.metadata.row_count, Some(1));
    assert_eq!(result.metadata.fields.len(), 2);
}

#[tokio::test]
async fn test_column_translation_round_trip() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend, Dialect::Postgres, users_schema(), ClientConfig::new());
    let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

    let input = row(&[
        ("userId", Value::BigInt(BigInt::from(10))),
        ("createdAt", Value::Timestamp(created)),
    ]);
    let forward = client.to_database("users", input.clone());
    assert_eq!(forward.get("user_id"), Some(&Value::Text("10".into())));
    assert_eq!(
        forward.get("created_at"),
        Some(&Value::Text("2024-01-02T03:04:05.000Z".into()))
    );

    assert_eq!(client.from_database("users", forward), input);
}

#[tokio::test]
async fn test_select_one_count_and_run() {
    let backend = ScriptedBackend::new();
    backend.push_rows(vec![]);
    backend.push_rows(vec![row(&[("count", Value::Text("42".into()))])]);
    backend.push_rows(vec![]);
    backend.push_rows(vec![row(&[("a", Value::Int(1))]), row(&[("a", Value::Int(2))])]);
    let (client, _registry) = client_with(backend, Dialect::Postgres, Schema::new(), ClientConfig::new());

    assert_eq!(client.execute_select_one("SELECT 1 WHERE false", None).await.unwrap(), None);
    assert_eq!(client.execute_count("SELECT count(*) FROM t").await.unwrap(), 42);
    assert_eq!(client.execute_count("SELECT count(*) FROM t WHERE false").await.unwrap(), 0);

    let run = client.execute_run("DELETE FROM t").await.unwrap();
    assert!(run.success);
    assert_eq!(run.metadata.command, "DELETE");
    assert_eq!(run.metadata.row_count, Some(2));
}

#[tokio::test]
async fn test_with_cte_prepends_expressions() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    client
        .with_cte(&[("recent", "SELECT * FROM posts LIMIT 5")], "SELECT * FROM recent", None)
        .await
        .unwrap();

    assert_eq!(
        backend.queries(),
        vec!["WITH recent AS (SELECT * FROM posts LIMIT 5) SELECT * FROM recent"]
    );
}

#[tokio::test]
async fn test_validate_uses_configured_policy() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend, Dialect::Postgres, users_schema(), ClientConfig::new());

    let err = client
        .validate("users", &row(&[("name", Value::Text("too long".into()))]))
        .unwrap_err();
    assert!(matches!(err, PgKitError::Validation(_)));

    let report = client
        .validate("users", &row(&[("name", Value::Text("ok".into()))]))
        .unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_transaction_runs_on_acquired_connection() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    let mut tx = client
        .begin(pgkit::TransactionOptions::new())
        .await
        .unwrap();
    tx.savepoint("sp1").await.unwrap();
    tx.query("INSERT INTO t VALUES (1)").await.unwrap();
    tx.commit().await.unwrap();

    let queries = backend.queries();
    assert_eq!(queries.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(queries.last().map(String::as_str), Some("COMMIT"));
    assert!(queries.contains(&"SAVEPOINT sp1".to_string()));
}
