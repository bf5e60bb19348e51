// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Every write the in-memory backend performs inside a transaction records the
// inverse operation. ROLLBACK replays the log backwards; COMMIT discards it.
//
// ============================================================================

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    CreateTable {
        table: String,
    },
    InsertRow {
        table: String,
        query_id: String,
    },
    UpdateRow {
        table: String,
        query_id: String,
        old_completed_at: Option<DateTime<Utc>>,
    },
    DeleteRow {
        table: String,
        query_id: String,
        old_completed_at: Option<DateTime<Utc>>,
    },
    /// A user statement appended to the journal.
    Journal { seq: u64 },
}

impl Change {
    /// Table affected by this change, if any
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Change::CreateTable { table }
            | Change::InsertRow { table, .. }
            | Change::UpdateRow { table, .. }
            | Change::DeleteRow { table, .. } => Some(table),
            Change::Journal { .. } => None,
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Change::CreateTable { .. })
    }
}
