use super::{Dialect, ErrorClass, ReadOnlyMode, TableReference, query_id_literal, quote_with};
use crate::core::{DriverError, QueryId};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";
const DUPLICATE_TABLE: &str = "42P07";
const READ_ONLY_SQL_TRANSACTION: &str = "25006";
const ADMIN_SHUTDOWN: &str = "57P01";
const CONNECTION_EXCEPTION_CLASS: &str = "08";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_with('"', ident)
    }

    fn create_status_table(&self, table: &TableReference) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (query_id text NOT NULL PRIMARY KEY, completed_at timestamptz)",
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
            "UPDATE {} SET completed_at = CURRENT_TIMESTAMP WHERE query_id = {}",
            table.render(self),
            query_id_literal(query_id)
        )
    }

    fn delete_completed_before(&self, table: &TableReference, cutoff: DateTime<Utc>) -> String {
        format!(
            "DELETE FROM {} WHERE completed_at < '{}'",
            table.render(self),
            cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }

    fn delete_expired(&self, table: &TableReference, retention: Duration) -> String {
        format!(
            "DELETE FROM {} WHERE completed_at < CURRENT_TIMESTAMP - INTERVAL '{} seconds'",
            table.render(self),
            retention.as_secs()
        )
    }

    fn read_only(&self) -> ReadOnlyMode {
        ReadOnlyMode::AfterBegin("SET TRANSACTION READ ONLY")
    }

    fn classify(&self, err: &DriverError) -> ErrorClass {
        if err.is_connection_lost() {
            return ErrorClass::ConnectionFailure;
        }
        match err.code() {
            Some(LOCK_NOT_AVAILABLE) => ErrorClass::LockNotAvailable,
            Some(UNIQUE_VIOLATION) => ErrorClass::UniqueViolation,
            Some(DUPLICATE_TABLE) => ErrorClass::DuplicateTable,
            Some(READ_ONLY_SQL_TRANSACTION) => ErrorClass::ReadOnlyTransaction,
            Some(ADMIN_SHUTDOWN) => ErrorClass::ConnectionFailure,
            Some(code) if code.starts_with(CONNECTION_EXCEPTION_CLASS) => {
                ErrorClass::ConnectionFailure
            }
            _ => ErrorClass::Other,
        }
    }
}
