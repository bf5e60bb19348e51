// ============================================================================
// Transaction Scope
// ============================================================================
//
// A `Transaction` borrows a connection for the lifetime of one short
// bookkeeping transaction and must be finished with `commit` or `rollback`.
//
// Async rollback is not possible in `Drop`, so a scope that is dropped
// unfinished (a cancelled future, a panic) leaves the transaction open on the
// connection. `Transaction::begin` rolls such a leftover back before starting,
// so nothing leaks into the next operation on that connection.
//
// ============================================================================

use crate::connection::Connection;
use crate::core::DriverError;
use crate::result::QueryResult;
use tracing::{debug, warn};

pub struct Transaction<'c, C: Connection + ?Sized> {
    conn: &'c mut C,
    finished: bool,
}

/// Roll back a transaction an earlier, unfinished scope left open.
pub async fn release_leftover<C: Connection + ?Sized>(conn: &mut C) -> Result<(), DriverError> {
    if conn.is_in_transaction() {
        warn!("Rolling back a transaction left open on the connection by an earlier scope");
        conn.rollback().await?;
    }
    Ok(())
}

impl<'c, C: Connection + ?Sized> Transaction<'c, C> {
    pub async fn begin(conn: &'c mut C) -> Result<Self, DriverError> {
        release_leftover(conn).await?;
        conn.begin().await?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        self.conn.execute(sql).await
    }

    /// Commit. If the commit itself fails, the transaction is rolled back
    /// before the error is returned.
    pub async fn commit(mut self) -> Result<(), DriverError> {
        self.finished = true;
        let result = self.conn.commit().await;
        if result.is_err() && self.conn.is_in_transaction() {
            let _ = self.conn.rollback().await;
        }
        result
    }

    pub async fn rollback(mut self) -> Result<(), DriverError> {
        self.finished = true;
        self.conn.rollback().await
    }

    /// Roll back on a path that is already failing; a second error is only logged.
    pub async fn abort(self) {
        if let Err(e) = self.rollback().await {
            debug!("Rollback after failure also failed: {}", e);
        }
    }
}

impl<C: Connection + ?Sized> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "Transaction dropped without commit or rollback; it stays open until the connection is reused or closed"
            );
        }
    }
}
