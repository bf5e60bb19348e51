/// Concurrent access tests
///
/// Several attempts racing for the same query id, each on its own connection.
/// Run with: cargo test --test concurrent_access_tests

use idemsql::status::Check;
use idemsql::storage::{MemoryConnection, MemoryDatabase};
use idemsql::{
    Connection, Coordinator, CoordinatorConfig, LockCoordinator, Outcome, PostgresDialect,
    RetryPolicy, Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

const STATEMENT: &str = "INSERT INTO payouts VALUES (42, 100)";

fn coordinator(retry: RetryPolicy) -> Arc<Coordinator> {
    let config = CoordinatorConfig::new().retry(retry);
    Arc::new(Coordinator::new(config, Arc::new(PostgresDialect)).unwrap())
}

#[tokio::test]
async fn test_conflict_while_row_is_locked() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator(RetryPolicy::no_retry());
    let qid = Uuid::new_v4();
    coordinator.ensure_table(&mut db.connect()).await.unwrap();
    db.insert_status_row(coordinator.store().table(), qid, None);

    let mut holder = db.connect();
    let mut held = Transaction::begin(&mut holder).await.unwrap();
    coordinator.store().lock_row(&mut held, qid).await.unwrap();

    let mut conn = db.connect();
    let outcome = coordinator.run(&mut conn, qid, STATEMENT).await.unwrap();
    assert_eq!(outcome, Outcome::Conflict);
    assert_eq!(db.statement_count(STATEMENT), 0);
    assert!(!conn.is_in_transaction());

    held.rollback().await.unwrap();
    let outcome = coordinator.run(&mut conn, qid, STATEMENT).await.unwrap();
    assert_eq!(outcome, Outcome::Executed);
}

#[tokio::test]
async fn test_simultaneous_claims_single_winner() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator(RetryPolicy::no_retry());
    let qid = Uuid::new_v4();
    coordinator.ensure_table(&mut db.connect()).await.unwrap();

    // Process one is between its insert and its commit.
    let mut first = db.connect();
    let lock = LockCoordinator::new(coordinator.store().clone());
    let Check::Absent(mut claim) = lock.check(&mut first, qid).await.unwrap() else {
        panic!("fresh query id must be absent");
    };
    coordinator
        .store()
        .insert_incomplete(&mut claim, qid)
        .await
        .unwrap();

    let mut second = db.connect();
    let outcome = coordinator.run_once(&mut second, qid, STATEMENT).await.unwrap();
    assert_eq!(outcome, Outcome::Conflict);

    claim.commit().await.unwrap();
    complete_claim(&mut first, &coordinator, qid).await;

    let outcome = coordinator.run_once(&mut second, qid, STATEMENT).await.unwrap();
    assert_eq!(outcome, Outcome::AlreadyCompleted);
    assert_eq!(db.statement_count(STATEMENT), 1);
}

#[tokio::test]
async fn test_retry_succeeds_after_lock_is_released() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator(RetryPolicy {
        max_attempts: 20,
        base_backoff_ms: 5,
        max_backoff_ms: 20,
    });
    let qid = Uuid::new_v4();
    coordinator.ensure_table(&mut db.connect()).await.unwrap();
    db.insert_status_row(coordinator.store().table(), qid, None);

    let (locked_tx, locked_rx) = oneshot::channel();
    let holder_db = db.clone();
    let holder_coordinator = Arc::clone(&coordinator);
    let holder = tokio::spawn(async move {
        let mut conn = holder_db.connect();
        let mut tx = Transaction::begin(&mut conn).await.unwrap();
        holder_coordinator
            .store()
            .lock_row(&mut tx, qid)
            .await
            .unwrap();
        locked_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.rollback().await.unwrap();
    });

    locked_rx.await.unwrap();
    let mut conn = db.connect();
    let outcome = coordinator.run(&mut conn, qid, STATEMENT).await.unwrap();

    assert_eq!(outcome, Outcome::Executed);
    assert_eq!(db.statement_count(STATEMENT), 1);
    holder.await.unwrap();
}

#[tokio::test]
async fn test_retry_gives_up_with_conflict() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator(RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 1,
        max_backoff_ms: 2,
    });
    let qid = Uuid::new_v4();
    coordinator.ensure_table(&mut db.connect()).await.unwrap();
    db.insert_status_row(coordinator.store().table(), qid, None);

    let mut holder = db.connect();
    let mut held = Transaction::begin(&mut holder).await.unwrap();
    coordinator.store().lock_row(&mut held, qid).await.unwrap();

    let mut conn = db.connect();
    let outcome = coordinator.run(&mut conn, qid, STATEMENT).await.unwrap();
    assert_eq!(outcome, Outcome::Conflict);
    assert_eq!(db.statement_count(STATEMENT), 0);

    held.rollback().await.unwrap();
}

// Single-threaded interleaving: the current-thread runtime switches tasks only
// at await points and the memory backend never yields, so no task can observe
// another's claim mid-RUN. With worker threads an overlapping CHECK sees an
// incomplete row and runs the statement again.
#[tokio::test]
async fn test_interleaved_tasks_execute_once() {
    let db = MemoryDatabase::new();
    let coordinator = coordinator(RetryPolicy {
        max_attempts: 50,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
    });
    let qid = Uuid::new_v4();

    let mut handles = vec![];
    for _ in 0..8 {
        let db = db.clone();
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            let mut conn = db.connect();
            coordinator.run(&mut conn, qid, STATEMENT).await.unwrap()
        }));
    }

    let mut executed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Outcome::Executed => executed += 1,
            Outcome::AlreadyCompleted => {}
            Outcome::Conflict => panic!("retry budget exhausted"),
        }
    }

    assert_eq!(executed, 1);
    assert_eq!(db.statement_count(STATEMENT), 1);
}

/// Finish the RUN and COMMIT steps for a claim made by hand.
async fn complete_claim(conn: &mut MemoryConnection, coordinator: &Coordinator, qid: Uuid) {
    conn.execute(STATEMENT).await.unwrap();
    coordinator.store().mark_complete(conn, qid).await.unwrap();
}
