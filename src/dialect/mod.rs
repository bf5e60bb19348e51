// ============================================================================
// SQL Dialects
// ============================================================================
//
// Everything vendor specific about the coordination protocol lives here:
// identifier quoting, the non-blocking row lock syntax, the status table
// DDL, and the error codes that mean "lock not available" or "duplicate key".
// The state machine above this layer is vendor agnostic.
//
// ============================================================================

pub mod mysql;
pub mod postgres;
pub mod table;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use table::TableReference;

use crate::core::{DriverError, QueryId};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Classification of a driver error, as far as coordination cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A non-blocking lock request hit a row held by another transaction.
    LockNotAvailable,
    UniqueViolation,
    DuplicateTable,
    /// A write was attempted inside a read-only transaction.
    ReadOnlyTransaction,
    ConnectionFailure,
    Other,
}

/// Where the read-only switch has to be issued relative to `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyMode {
    /// Applies to the next transaction only.
    BeforeBegin(&'static str),
    /// Applies to the transaction that is already open.
    AfterBegin(&'static str),
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_identifier(&self, ident: &str) -> String;

    fn create_status_table(&self, table: &TableReference) -> String;

    /// `SELECT completed_at ... FOR UPDATE NOWAIT` for one query id.
    fn lock_status_row(&self, table: &TableReference, query_id: QueryId) -> String;

    /// Plain read of one status row, taking no lock.
    fn select_status_row(&self, table: &TableReference, query_id: QueryId) -> String;

    fn insert_incomplete(&self, table: &TableReference, query_id: QueryId) -> String;

    /// Set `completed_at` from the database clock.
    fn mark_complete(&self, table: &TableReference, query_id: QueryId) -> String;

    fn delete_completed_before(&self, table: &TableReference, cutoff: DateTime<Utc>) -> String;

    /// Delete rows completed more than `retention` ago by the database clock.
    fn delete_expired(&self, table: &TableReference, retention: Duration) -> String;

    fn read_only(&self) -> ReadOnlyMode;

    fn classify(&self, err: &DriverError) -> ErrorClass;
}

/// Render a query id the way the status table stores it.
pub(crate) fn query_id_literal(query_id: QueryId) -> String {
    format!("'{}'", query_id.hyphenated())
}

/// Double every occurrence of `quote` and wrap the result in it.
pub(crate) fn quote_with(quote: char, ident: &str) -> String {
    let mut escaped = String::with_capacity(ident.len() + 2);
    escaped.push(quote);
    for c in ident.chars() {
        if c == quote {
            escaped.push(quote);
        }
        escaped.push(c);
    }
    escaped.push(quote);
    escaped
}
