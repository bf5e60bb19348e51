// ============================================================================
// idemsql Library
// ============================================================================

pub mod config;
pub mod connection;
pub mod core;
pub mod dialect;
pub mod executor;
pub mod result;
pub mod status;
pub mod storage;
pub mod sweeper;
pub mod transaction;

#[cfg(feature = "postgres")]
pub mod cli;

// Re-export main types for convenience
pub use config::CoordinatorConfig;
pub use connection::Connection;
pub use crate::core::{DriverError, QueryId, Result, TxError, Value};
pub use dialect::{Dialect, MysqlDialect, PostgresDialect, TableReference};
pub use executor::{IdempotentExecutor, Outcome, RetryPolicy};
pub use result::QueryResult;
pub use status::{LockCoordinator, LockState, StatusRow, StatusStore};
pub use sweeper::{RetentionSweeper, SweeperHandle};
pub use transaction::Transaction;

use std::sync::Arc;

// ============================================================================
// Coordinator
// ============================================================================

/// At-most-once statement execution over one status table.
///
/// # Examples
///
/// ```
/// use idemsql::{Coordinator, CoordinatorConfig, Outcome, PostgresDialect};
/// use idemsql::storage::MemoryDatabase;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let coordinator = Coordinator::new(CoordinatorConfig::default(), Arc::new(PostgresDialect))?;
/// let db = MemoryDatabase::new();
/// let mut conn = db.connect();
/// let query_id = uuid::Uuid::new_v4();
///
/// let sql = "UPDATE accounts SET balance = balance - 10 WHERE id = 7";
/// assert_eq!(coordinator.run(&mut conn, query_id, sql).await?, Outcome::Executed);
/// assert_eq!(coordinator.run(&mut conn, query_id, sql).await?, Outcome::AlreadyCompleted);
/// # Ok::<(), idemsql::TxError>(())
/// # }).unwrap();
/// ```
pub struct Coordinator {
    config: CoordinatorConfig,
    executor: IdempotentExecutor,
    sweeper: RetentionSweeper,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, dialect: Arc<dyn Dialect>) -> Result<Self> {
        config.validate().map_err(TxError::InvalidConfig)?;

        let store = StatusStore::new(config.table_reference()?, dialect);
        let executor = IdempotentExecutor::new(LockCoordinator::new(store.clone()))
            .with_strict_transaction(config.strict_transaction)
            .with_retry_policy(config.retry.clone());
        let sweeper = RetentionSweeper::new(store, config.retention);

        Ok(Self {
            config,
            executor,
            sweeper,
        })
    }

    /// Run with the configured conflict retry policy.
    pub async fn run<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
        sql: &str,
    ) -> Result<Outcome> {
        self.executor.run_with_retry(conn, query_id, sql).await
    }

    /// Run a single attempt; a conflict is returned as is.
    pub async fn run_once<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
        sql: &str,
    ) -> Result<Outcome> {
        self.executor.run(conn, query_id, sql).await
    }

    pub async fn query_read_only<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        sql: &str,
    ) -> Result<QueryResult> {
        self.executor.query_read_only(conn, sql).await
    }

    /// Create the status table ahead of the first run.
    pub async fn ensure_table<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<()> {
        self.store().ensure_table(conn).await
    }

    pub async fn status<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
    ) -> Result<Option<StatusRow>> {
        self.store().status(conn, query_id).await
    }

    pub async fn sweep<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<u64> {
        self.sweeper.sweep(conn).await
    }

    /// Sweep on a background task every `sweep_interval`.
    pub fn spawn_sweeper<C: Connection + 'static>(&self, conn: C) -> SweeperHandle<C> {
        self.sweeper
            .clone()
            .spawn(conn, self.config.sweep_interval)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn executor(&self) -> &IdempotentExecutor {
        &self.executor
    }

    pub fn store(&self) -> &StatusStore {
        self.executor.store()
    }

    pub fn sweeper(&self) -> &RetentionSweeper {
        &self.sweeper
    }
}
