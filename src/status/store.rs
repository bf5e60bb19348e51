use super::{LockState, StatusRow};
use crate::connection::Connection;
use crate::core::{DriverError, QueryId, Result, TxError};
use crate::dialect::{Dialect, ErrorClass, TableReference};
use crate::transaction::{Transaction, release_leftover};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Raw operations on the status table.
///
/// Every driver error is converted here: connection failures become
/// `DatabaseUnavailable`, lock and duplicate-key failures become
/// `LockConflict`, and anything else is a `SchemaError`.
#[derive(Clone)]
pub struct StatusStore {
    table: TableReference,
    dialect: Arc<dyn Dialect>,
}

impl StatusStore {
    pub fn new(table: TableReference, dialect: Arc<dyn Dialect>) -> Self {
        Self { table, dialect }
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Create the status table if it does not exist.
    ///
    /// Losing a creation race to another process is not an error.
    pub async fn ensure_table<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<()> {
        release_leftover(conn)
            .await
            .map_err(|e| self.classify_error("release leftover transaction", e))?;

        let sql = self.dialect.create_status_table(&self.table);
        match conn.execute(&sql).await {
            Ok(_) => {
                debug!(table = %self.table, "Status table ready");
                Ok(())
            }
            Err(err) => match self.dialect.classify(&err) {
                ErrorClass::DuplicateTable | ErrorClass::UniqueViolation => {
                    debug!(table = %self.table, "Status table created concurrently");
                    Ok(())
                }
                _ => Err(self.classify_error("create status table", err)),
            },
        }
    }

    /// Try to lock the status row without waiting.
    ///
    /// Runs inside the caller's transaction. On `LockConflict` the caller
    /// must roll that transaction back.
    pub async fn lock_row<C: Connection + ?Sized>(
        &self,
        tx: &mut Transaction<'_, C>,
        query_id: QueryId,
    ) -> Result<LockState> {
        let sql = self.dialect.lock_status_row(&self.table, query_id);
        let result = tx
            .execute(&sql)
            .await
            .map_err(|e| self.classify_error("lock status row", e))?;

        let state = match result.rows.first() {
            None => LockState::Absent,
            Some(row) => match row.first() {
                Some(value) if !value.is_null() => LockState::LockedComplete,
                _ => LockState::LockedIncomplete,
            },
        };
        debug!(%query_id, ?state, "Status row lock acquired");
        Ok(state)
    }

    /// Insert an incomplete row inside the caller's transaction.
    ///
    /// A concurrent inserter winning the race surfaces as `LockConflict`.
    pub async fn insert_incomplete<C: Connection + ?Sized>(
        &self,
        tx: &mut Transaction<'_, C>,
        query_id: QueryId,
    ) -> Result<()> {
        let sql = self.dialect.insert_incomplete(&self.table, query_id);
        tx.execute(&sql)
            .await
            .map_err(|e| self.classify_error("insert status row", e))?;
        debug!(%query_id, "Status row inserted");
        Ok(())
    }

    /// Set `completed_at` to the database's current time and commit.
    pub async fn mark_complete<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
    ) -> Result<()> {
        let mut tx = Transaction::begin(conn)
            .await
            .map_err(|e| self.classify_error("begin completion transaction", e))?;

        let sql = self.dialect.mark_complete(&self.table, query_id);
        let result = match tx.execute(&sql).await {
            Ok(result) => result,
            Err(err) => {
                tx.abort().await;
                return Err(self.classify_error("mark status row complete", err));
            }
        };

        if result.affected_rows == 0 {
            tx.abort().await;
            return Err(TxError::SchemaError {
                context: "mark status row complete".into(),
                reason: format!("status row for query {} does not exist", query_id),
                source: None,
            });
        }

        tx.commit()
            .await
            .map_err(|e| self.classify_error("commit status row completion", e))?;
        debug!(%query_id, "Status row marked complete");
        Ok(())
    }

    /// Delete rows completed before `cutoff`. Incomplete rows never match.
    pub async fn delete_older_than<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let sql = self.dialect.delete_completed_before(&self.table, cutoff);
        self.delete(conn, &sql).await
    }

    /// Delete rows completed more than `retention` ago, measured by the
    /// database clock.
    pub async fn delete_expired<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        retention: Duration,
    ) -> Result<u64> {
        let sql = self.dialect.delete_expired(&self.table, retention);
        self.delete(conn, &sql).await
    }

    /// Read a status row without locking it.
    pub async fn status<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
    ) -> Result<Option<StatusRow>> {
        release_leftover(conn)
            .await
            .map_err(|e| self.classify_error("release leftover transaction", e))?;

        let sql = self.dialect.select_status_row(&self.table, query_id);
        let result = conn
            .execute(&sql)
            .await
            .map_err(|e| self.classify_error("read status row", e))?;

        let Some(value) = result.first_value() else {
            return Ok(None);
        };
        let completed_at = if value.is_null() {
            None
        } else {
            let ts = value.as_timestamp().ok_or_else(|| TxError::SchemaError {
                context: "read status row".into(),
                reason: format!("unexpected completed_at value '{}'", value),
                source: None,
            })?;
            Some(ts)
        };

        Ok(Some(StatusRow {
            query_id,
            completed_at,
        }))
    }

    async fn delete<C: Connection + ?Sized>(&self, conn: &mut C, sql: &str) -> Result<u64> {
        release_leftover(conn)
            .await
            .map_err(|e| self.classify_error("release leftover transaction", e))?;

        let result = conn
            .execute(sql)
            .await
            .map_err(|e| self.classify_error("delete old status rows", e))?;
        Ok(result.affected_rows)
    }

    pub(crate) fn classify_error(&self, context: &str, err: DriverError) -> TxError {
        match self.dialect.classify(&err) {
            ErrorClass::ConnectionFailure => TxError::DatabaseUnavailable {
                context: context.to_string(),
                source: err,
            },
            ErrorClass::LockNotAvailable | ErrorClass::UniqueViolation => TxError::LockConflict {
                context: context.to_string(),
                source: err,
            },
            _ => TxError::SchemaError {
                context: context.to_string(),
                reason: err.to_string(),
                source: Some(err),
            },
        }
    }
}
