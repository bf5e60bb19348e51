use super::RetryPolicy;
use crate::connection::Connection;
use crate::core::{DriverError, QueryId, Result, TxError};
use crate::dialect::{ErrorClass, ReadOnlyMode};
use crate::result::QueryResult;
use crate::status::{Check, LockCoordinator, StatusStore};
use crate::transaction::{Transaction, release_leftover};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Terminal state of one run. Fatal outcomes are `Err(TxError)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The statement ran in this call and its completion was recorded.
    Executed,
    /// The statement took effect in an earlier call; nothing ran.
    AlreadyCompleted,
    /// Another attempt holds the query id right now. Try again later.
    Conflict,
}

impl Outcome {
    /// True for both success paths.
    pub fn is_done(&self) -> bool {
        !matches!(self, Outcome::Conflict)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Executed => write!(f, "executed"),
            Outcome::AlreadyCompleted => write!(f, "already completed"),
            Outcome::Conflict => write!(f, "conflict"),
        }
    }
}

pub struct IdempotentExecutor {
    coordinator: LockCoordinator,
    strict_transaction: bool,
    retry: RetryPolicy,
    table_ready: AtomicBool,
}

impl IdempotentExecutor {
    pub fn new(coordinator: LockCoordinator) -> Self {
        Self {
            coordinator,
            strict_transaction: true,
            retry: RetryPolicy::default(),
            table_ready: AtomicBool::new(false),
        }
    }

    /// With `false`, statements run directly and the status table is never
    /// consulted.
    pub fn with_strict_transaction(mut self, strict: bool) -> Self {
        self.strict_transaction = strict;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &StatusStore {
        self.coordinator.store()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_strict(&self) -> bool {
        self.strict_transaction
    }

    /// Run `sql` at most once for `query_id`.
    ///
    /// `conn` must not be inside a transaction the caller still needs; any
    /// transaction left open on it is rolled back first.
    pub async fn run<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
        sql: &str,
    ) -> Result<Outcome> {
        if !self.strict_transaction {
            release_leftover(conn)
                .await
                .map_err(|e| self.store().classify_error("release leftover transaction", e))?;
            self.execute_statement(conn, query_id, sql).await?;
            info!(%query_id, "Statement executed without status tracking");
            return Ok(Outcome::Executed);
        }

        self.ensure_table(conn).await?;

        match self.coordinator.check(conn, query_id).await? {
            Check::Absent(mut tx) => {
                if let Err(err) = self.store().insert_incomplete(&mut tx, query_id).await {
                    tx.abort().await;
                    return conflict_or_fatal(query_id, err);
                }
                if let Err(e) = tx.commit().await {
                    let err = self.store().classify_error("commit status row claim", e);
                    return conflict_or_fatal(query_id, err);
                }
                debug!(%query_id, "Claimed new status row");
            }
            Check::Abandoned => {
                warn!(%query_id, "Found an abandoned attempt; running the statement again");
            }
            Check::Completed => {
                info!(%query_id, "Statement already completed; skipping");
                return Ok(Outcome::AlreadyCompleted);
            }
            Check::Conflict => return Ok(Outcome::Conflict),
        }

        self.execute_statement(conn, query_id, sql).await?;

        if let Err(err) = self.store().mark_complete(conn, query_id).await {
            error!(
                %query_id,
                "Statement took effect but its completion could not be recorded: {}", err
            );
            return Err(err);
        }

        info!(%query_id, "Statement executed and marked complete");
        Ok(Outcome::Executed)
    }

    /// Run `sql` inside a read-only transaction that is always rolled back.
    pub async fn query_read_only<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        sql: &str,
    ) -> Result<QueryResult> {
        let store = self.store();
        release_leftover(conn)
            .await
            .map_err(|e| store.classify_error("release leftover transaction", e))?;

        let mode = store.dialect().read_only();
        if let ReadOnlyMode::BeforeBegin(statement) = mode {
            conn.execute(statement)
                .await
                .map_err(|e| store.classify_error("enter read-only mode", e))?;
        }

        let mut tx = Transaction::begin(conn)
            .await
            .map_err(|e| store.classify_error("begin read-only transaction", e))?;

        if let ReadOnlyMode::AfterBegin(statement) = mode {
            if let Err(e) = tx.execute(statement).await {
                tx.abort().await;
                return Err(store.classify_error("enter read-only mode", e));
            }
        }

        let result = tx.execute(sql).await;
        if let Err(e) = tx.rollback().await {
            warn!("Failed to roll back read-only transaction: {}", e);
        }

        result.map_err(|source| match store.dialect().classify(&source) {
            ErrorClass::ReadOnlyTransaction => TxError::NotReadOnly { source },
            ErrorClass::ConnectionFailure => TxError::DatabaseUnavailable {
                context: "run read-only query".into(),
                source,
            },
            _ => TxError::QueryFailed { source },
        })
    }

    async fn ensure_table<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<()> {
        if self.table_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.store().ensure_table(conn).await?;
        self.table_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn execute_statement<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
        sql: &str,
    ) -> Result<QueryResult> {
        conn.execute(sql)
            .await
            .map_err(|source| self.statement_error(query_id, source))
    }

    fn statement_error(&self, query_id: QueryId, source: DriverError) -> TxError {
        if self.store().dialect().classify(&source) == ErrorClass::ConnectionFailure {
            TxError::DatabaseUnavailable {
                context: "execute statement".into(),
                source,
            }
        } else {
            warn!(%query_id, "Statement failed; status row stays incomplete: {}", source);
            TxError::StatementFailed { query_id, source }
        }
    }
}

fn conflict_or_fatal(query_id: QueryId, err: TxError) -> Result<Outcome> {
    if err.is_lock_conflict() {
        warn!(%query_id, "Another attempt claimed the query first: {}", err);
        Ok(Outcome::Conflict)
    } else {
        Err(err)
    }
}
