use crate::core::QueryId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a successful non-blocking lock attempt on a status row.
///
/// A failed attempt is not a state; it surfaces as `TxError::LockConflict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No row exists for the query id.
    Absent,
    /// Row locked, statement never completed.
    LockedIncomplete,
    /// Row locked, statement already took effect.
    LockedComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub query_id: QueryId,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusRow {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}
