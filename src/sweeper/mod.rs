// ============================================================================
// Retention Sweeper
// ============================================================================
//
// Deletes status rows whose `completed_at` is older than the retention
// window. Rows without `completed_at` are never touched: they belong to a
// live attempt or mark an abandoned one that must be re-run, not forgotten.
//
// ============================================================================

use crate::connection::Connection;
use crate::core::{Result, TxError};
use crate::status::StatusStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RetentionSweeper {
    store: StatusStore,
    retention: Duration,
}

impl RetentionSweeper {
    pub fn new(store: StatusStore, retention: Duration) -> Self {
        Self { store, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Delete rows completed more than `retention` ago by the database clock.
    ///
    /// Rows locked by a concurrent check make the round report zero.
    pub async fn sweep<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<u64> {
        let result = self.store.delete_expired(conn, self.retention).await;
        self.report(result)
    }

    /// Delete rows completed before an explicit cutoff.
    pub async fn sweep_before<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = self.store.delete_older_than(conn, cutoff).await;
        self.report(result)
    }

    fn report(&self, result: Result<u64>) -> Result<u64> {
        match result {
            Ok(deleted) => {
                info!(table = %self.store.table(), deleted, "Swept expired status rows");
                Ok(deleted)
            }
            Err(err) if err.is_lock_conflict() => {
                debug!("Sweep skipped a locked row, retrying next round: {}", err);
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    /// Sweep every `interval` on a background task that owns `conn`.
    pub fn spawn<C>(self, mut conn: C, interval: Duration) -> SweeperHandle<C>
    where
        C: Connection + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep(&mut conn).await {
                            warn!("Retention sweep failed: {}", err);
                        }
                    }
                }
            }
            conn
        });

        SweeperHandle {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }
}

/// Background sweeper task. Dropping the handle aborts the task.
pub struct SweeperHandle<C> {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<C>>,
}

impl<C> SweeperHandle<C> {
    /// Signals the task to stop, waits for it, and hands back the connection.
    pub async fn shutdown(mut self) -> Result<C> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let join_handle = self
            .join_handle
            .take()
            .ok_or_else(|| TxError::BackgroundTask("sweeper already stopped".into()))?;
        join_handle
            .await
            .map_err(|err| TxError::BackgroundTask(format!("sweeper join: {}", err)))
    }
}

impl<C> Drop for SweeperHandle<C> {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
