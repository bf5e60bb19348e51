use super::{Dialect, ErrorClass, ReadOnlyMode, TableReference, query_id_literal, quote_with};
use crate::core::{DriverError, QueryId};
use chrono::{DateTime, Utc};
use std::time::Duration;

const ER_LOCK_NOWAIT: &str = "3572";
const ER_DUP_ENTRY: &str = "1062";
const ER_TABLE_EXISTS_ERROR: &str = "1050";
const ER_CANT_EXECUTE_IN_READ_ONLY_TRANSACTION: &str = "1792";
const CONNECTION_ERRORS: [&str; 4] = ["2002", "2003", "2006", "2013"];

/// MySQL 8.0.1 or later (`NOWAIT` support).
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_with('`', ident)
    }

    fn create_status_table(&self, table: &TableReference) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (query_id CHAR(36) NOT NULL PRIMARY KEY, completed_at DATETIME(6) NULL)",
            table.render(self)
        )
    }

    fn lock_status_row(&self, table: &TableReference, query_id: QueryId) -> String {
        format!(
            "{} FOR UPDATE NOWAIT",
            self.select_status_row(table, query_id)
        )
    }

    fn select_status_row(&self, table: &TableReference, query_id: QueryId) -> String {
        format!(
            "SELECT completed_at FROM {} WHERE query_id = {}",
            table.render(self),
            query_id_literal(query_id)
        )
    }

    fn insert_incomplete(&self, table: &TableReference, query_id: QueryId) -> String {
        format!(
            "INSERT INTO {} (query_id, completed_at) VALUES ({}, NULL)",
            table.render(self),
            query_id_literal(query_id)
        )
    }

    fn mark_complete(&self, table: &TableReference, query_id: QueryId) -> String {
        format!(
            "UPDATE {} SET completed_at = UTC_TIMESTAMP(6) WHERE query_id = {}",
            table.render(self),
            query_id_literal(query_id)
        )
    }

    fn delete_completed_before(&self, table: &TableReference, cutoff: DateTime<Utc>) -> String {
        format!(
            "DELETE FROM {} WHERE completed_at < '{}'",
            table.render(self),
            cutoff.format("%Y-%m-%d %H:%M:%S%.6f")
        )
    }

    fn delete_expired(&self, table: &TableReference, retention: Duration) -> String {
        format!(
            "DELETE FROM {} WHERE completed_at < UTC_TIMESTAMP(6) - INTERVAL {} SECOND",
            table.render(self),
            retention.as_secs()
        )
    }

    fn read_only(&self) -> ReadOnlyMode {
        ReadOnlyMode::BeforeBegin("SET TRANSACTION READ ONLY")
    }

    fn classify(&self, err: &DriverError) -> ErrorClass {
        if err.is_connection_lost() {
            return ErrorClass::ConnectionFailure;
        }
        match err.code() {
            Some(ER_LOCK_NOWAIT) => ErrorClass::LockNotAvailable,
            Some(ER_DUP_ENTRY) => ErrorClass::UniqueViolation,
            Some(ER_TABLE_EXISTS_ERROR) => ErrorClass::DuplicateTable,
            Some(ER_CANT_EXECUTE_IN_READ_ONLY_TRANSACTION) => ErrorClass::ReadOnlyTransaction,
            Some(code) if CONNECTION_ERRORS.contains(&code) => ErrorClass::ConnectionFailure,
            _ => ErrorClass::Other,
        }
    }
}
