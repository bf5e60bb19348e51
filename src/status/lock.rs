use super::{LockState, StatusStore};
use crate::connection::Connection;
use crate::core::{QueryId, Result};
use crate::transaction::Transaction;
use tracing::{debug, warn};

/// Classified result of a non-blocking lock check on a status row.
pub enum Check<'c, C: Connection + ?Sized> {
    /// No row exists. The lock transaction is still open so the claim row
    /// can be inserted in it.
    Absent(Transaction<'c, C>),
    /// Incomplete row nobody holds. The lock has been released.
    Abandoned,
    /// The statement already took effect. The lock has been released.
    Completed,
    /// Another live attempt holds the row. Nothing is left open.
    Conflict,
}

impl<C: Connection + ?Sized> std::fmt::Debug for Check<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Check::Absent(_) => "Absent",
            Check::Abandoned => "Abandoned",
            Check::Completed => "Completed",
            Check::Conflict => "Conflict",
        };
        f.write_str(name)
    }
}

/// Turns a status row lock attempt into a lifecycle decision.
///
/// Conflicts are reported, never retried here; backoff belongs to the caller.
#[derive(Clone)]
pub struct LockCoordinator {
    store: StatusStore,
}

impl LockCoordinator {
    pub fn new(store: StatusStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub async fn check<'c, C: Connection + ?Sized>(
        &self,
        conn: &'c mut C,
        query_id: QueryId,
    ) -> Result<Check<'c, C>> {
        let mut tx = Transaction::begin(conn)
            .await
            .map_err(|e| self.store.classify_error("begin lock transaction", e))?;

        let state = match self.store.lock_row(&mut tx, query_id).await {
            Ok(state) => state,
            Err(err) if err.is_lock_conflict() => {
                tx.abort().await;
                warn!(%query_id, "Status row is locked by another attempt: {}", err);
                return Ok(Check::Conflict);
            }
            Err(err) => {
                tx.abort().await;
                return Err(err);
            }
        };

        let check = match state {
            LockState::Absent => return Ok(Check::Absent(tx)),
            LockState::LockedIncomplete => Check::Abandoned,
            LockState::LockedComplete => Check::Completed,
        };

        tx.rollback()
            .await
            .map_err(|e| self.store.classify_error("release status row lock", e))?;
        debug!(%query_id, ?check, "Status row lock released");
        Ok(check)
    }
}
