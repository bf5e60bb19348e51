/// Idempotent executor tests
///
/// Single-caller behaviour of the CHECK / RUN / COMMIT state machine against
/// the in-memory backend.
/// Run with: cargo test --test idempotent_executor_tests

use idemsql::status::Check;
use idemsql::storage::MemoryDatabase;
use idemsql::{
    Connection, Coordinator, CoordinatorConfig, DriverError, Outcome, PostgresDialect, TxError,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

const TRANSFER: &str = "UPDATE accounts SET balance = balance - 10 WHERE id = 7";

fn coordinator() -> Coordinator {
    Coordinator::new(CoordinatorConfig::default(), Arc::new(PostgresDialect)).unwrap()
}

#[tokio::test]
async fn test_second_run_skips_statement() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();
    let qid = Uuid::new_v4();

    assert_eq!(
        assert_ok!(coordinator.run(&mut conn, qid, TRANSFER).await),
        Outcome::Executed
    );
    assert_eq!(
        assert_ok!(coordinator.run(&mut conn, qid, TRANSFER).await),
        Outcome::AlreadyCompleted
    );

    assert_eq!(db.statement_count(TRANSFER), 1);
    assert!(!conn.is_in_transaction());
}

#[tokio::test]
async fn test_distinct_query_ids_run_independently() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();

    for _ in 0..3 {
        let outcome = coordinator
            .run(&mut conn, Uuid::new_v4(), TRANSFER)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Executed);
    }

    assert_eq!(db.statement_count(TRANSFER), 3);
    assert_eq!(db.status_row_count(coordinator.store().table()), 3);
}

#[tokio::test]
async fn test_new_connection_sees_completion() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator();
    let qid = Uuid::new_v4();

    coordinator
        .run(&mut db.connect(), qid, TRANSFER)
        .await
        .unwrap();
    let outcome = coordinator
        .run(&mut db.connect(), qid, TRANSFER)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::AlreadyCompleted);
    assert_eq!(db.statement_count(TRANSFER), 1);
}

#[tokio::test]
async fn test_crash_after_claim_reruns_statement() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator();
    let qid = Uuid::new_v4();
    coordinator.ensure_table(&mut db.connect()).await.unwrap();

    // First process claims the query id, then dies before running it.
    {
        let mut conn = db.connect();
        let lock = idemsql::LockCoordinator::new(coordinator.store().clone());
        let Check::Absent(mut tx) = lock.check(&mut conn, qid).await.unwrap() else {
            panic!("fresh query id must be absent");
        };
        coordinator
            .store()
            .insert_incomplete(&mut tx, qid)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }
    assert_eq!(db.status_row(coordinator.store().table(), qid), Some(None));

    let outcome = coordinator
        .run(&mut db.connect(), qid, TRANSFER)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Executed);
    assert_eq!(db.statement_count(TRANSFER), 1);
    assert!(
        db.status_row(coordinator.store().table(), qid)
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_crash_before_claim_commit_leaves_nothing() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator();
    let qid = Uuid::new_v4();
    coordinator.ensure_table(&mut db.connect()).await.unwrap();

    {
        let mut conn = db.connect();
        let lock = idemsql::LockCoordinator::new(coordinator.store().clone());
        let Check::Absent(mut tx) = lock.check(&mut conn, qid).await.unwrap() else {
            panic!("fresh query id must be absent");
        };
        coordinator
            .store()
            .insert_incomplete(&mut tx, qid)
            .await
            .unwrap();
        // Connection dropped with the claim uncommitted.
        drop(tx);
    }
    assert_eq!(db.status_row(coordinator.store().table(), qid), None);

    let outcome = coordinator
        .run(&mut db.connect(), qid, TRANSFER)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Executed);
}

#[tokio::test]
async fn test_failed_statement_is_retried_on_next_run() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();
    let qid = Uuid::new_v4();

    db.fail_next_statement_containing(
        "UPDATE accounts",
        DriverError::with_code("40001", "could not serialize access due to concurrent update"),
    );

    let err = assert_err!(coordinator.run(&mut conn, qid, TRANSFER).await);
    assert!(matches!(err, TxError::StatementFailed { query_id, .. } if query_id == qid));
    assert!(err.is_retryable());
    assert_eq!(err.driver_error().and_then(|e| e.code()), Some("40001"));
    assert_eq!(db.status_row(coordinator.store().table(), qid), Some(None));
    assert_eq!(db.statement_count(TRANSFER), 0);

    let outcome = coordinator.run(&mut conn, qid, TRANSFER).await.unwrap();
    assert_eq!(outcome, Outcome::Executed);
    assert_eq!(db.statement_count(TRANSFER), 1);
}

#[tokio::test]
async fn test_unavailable_database_is_fatal() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();
    db.set_unavailable(true);

    let err = coordinator
        .run(&mut conn, Uuid::new_v4(), TRANSFER)
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::DatabaseUnavailable { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_connection_lost_during_statement() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();
    let qid = Uuid::new_v4();

    db.fail_next_statement_containing(
        "UPDATE accounts",
        DriverError::connection_lost("server closed the connection unexpectedly"),
    );

    let err = coordinator.run(&mut conn, qid, TRANSFER).await.unwrap_err();
    assert!(matches!(err, TxError::DatabaseUnavailable { .. }));
    assert_eq!(db.status_row(coordinator.store().table(), qid), Some(None));
}

#[tokio::test]
async fn test_schema_error_on_table_creation() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();

    db.fail_statements_containing(
        "CREATE TABLE",
        DriverError::with_code("42501", "permission denied for schema public"),
    );

    let err = coordinator
        .run(&mut conn, Uuid::new_v4(), TRANSFER)
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::SchemaError { .. }));
    assert_eq!(db.statement_count(TRANSFER), 0);
}

#[tokio::test]
async fn test_leftover_transaction_is_rolled_back() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();

    conn.begin().await.unwrap();
    conn.execute("INSERT INTO audit VALUES ('stale')")
        .await
        .unwrap();

    let outcome = coordinator
        .run(&mut conn, Uuid::new_v4(), TRANSFER)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Executed);
    assert_eq!(db.statement_count("audit"), 0);
    assert!(!conn.is_in_transaction());
}

#[tokio::test]
async fn test_non_strict_mode_runs_every_time() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = Coordinator::new(
        CoordinatorConfig::new().strict_transaction(false),
        Arc::new(PostgresDialect),
    )
    .unwrap();
    let qid = Uuid::new_v4();

    coordinator.run(&mut conn, qid, TRANSFER).await.unwrap();
    coordinator.run(&mut conn, qid, TRANSFER).await.unwrap();

    assert_eq!(db.statement_count(TRANSFER), 2);
}

#[tokio::test]
async fn test_non_strict_mode_rolls_back_leftover_transaction() {
    let db = MemoryDatabase::new();
    let coordinator = Coordinator::new(
        CoordinatorConfig::new().strict_transaction(false),
        Arc::new(PostgresDialect),
    )
    .unwrap();

    {
        let mut conn = db.connect();
        conn.begin().await.unwrap();
        conn.execute("INSERT INTO audit VALUES ('stale')")
            .await
            .unwrap();

        let outcome = assert_ok!(coordinator.run(&mut conn, Uuid::new_v4(), TRANSFER).await);
        assert_eq!(outcome, Outcome::Executed);
        assert!(!conn.is_in_transaction());
    }

    assert_eq!(db.statement_count("audit"), 0);
    assert_eq!(db.statement_count(TRANSFER), 1);
}

#[tokio::test]
async fn test_read_only_query_never_writes() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let coordinator = coordinator();

    let err = coordinator
        .query_read_only(&mut conn, TRANSFER)
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::NotReadOnly { .. }));
    assert_eq!(db.statement_count(TRANSFER), 0);

    db.fail_next_statement_containing(
        "FROM missing",
        DriverError::with_code("42P01", "relation \"missing\" does not exist"),
    );
    let err = coordinator
        .query_read_only(&mut conn, "SELECT * FROM missing")
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::QueryFailed { .. }));
    assert!(!conn.is_in_transaction());
}
