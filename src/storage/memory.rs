//! In-process database backend.
//!
//! Speaks the statements rendered by [`PostgresDialect`] and reproduces the
//! Postgres behaviour the coordination protocol depends on: row locks owned by
//! the locking transaction, `NOWAIT` failing with `55P03`, duplicate keys
//! failing with `23505`, and everything a transaction did being undone when
//! it rolls back or its connection goes away. It never blocks; a write that
//! would wait on another connection's row lock fails with `55P03` instead.
//!
//! Statements that are not status-table statements are appended to a journal
//! so tests can count how often a user statement took effect.

use super::{Change, Statement};
use crate::connection::Connection;
use crate::core::{DriverError, QueryId, Value};
use crate::dialect::{PostgresDialect, TableReference};
use crate::result::QueryResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type StatusRows = BTreeMap<String, Option<DateTime<Utc>>>;

/// Shared database instance. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, StatusRows>,
    /// (table, query_id) -> owning connection
    row_locks: HashMap<(String, String), u64>,
    journal: Vec<JournalEntry>,
    next_journal_seq: u64,
    failures: Vec<InjectedFailure>,
    frozen_clock: Option<DateTime<Utc>>,
    unavailable: bool,
    next_connection_id: u64,
}

struct JournalEntry {
    seq: u64,
    sql: String,
}

struct InjectedFailure {
    pattern: String,
    error: DriverError,
    remaining: Option<usize>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection (session) to this database.
    pub fn connect(&self) -> MemoryConnection {
        let id = {
            let mut state = self.state();
            state.next_connection_id += 1;
            state.next_connection_id
        };
        MemoryConnection {
            id,
            db: self.clone(),
            tx: None,
        }
    }

    /// Current database time.
    pub fn now(&self) -> DateTime<Utc> {
        self.state().now()
    }

    /// Stop the database clock at `at`.
    pub fn freeze_clock(&self, at: DateTime<Utc>) {
        self.state().frozen_clock = Some(at);
    }

    /// Move the database clock forward, freezing it if it was running.
    pub fn advance_clock(&self, by: Duration) {
        let mut state = self.state();
        let now = state.now();
        state.frozen_clock = Some(now + chrono::Duration::from_std(by).unwrap_or_default());
    }

    /// Make every connection fail as if the server went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Fail every statement containing `pattern` with `error`.
    pub fn fail_statements_containing(&self, pattern: impl Into<String>, error: DriverError) {
        self.state().failures.push(InjectedFailure {
            pattern: pattern.into(),
            error,
            remaining: None,
        });
    }

    /// Fail only the next statement containing `pattern`.
    pub fn fail_next_statement_containing(&self, pattern: impl Into<String>, error: DriverError) {
        self.state().failures.push(InjectedFailure {
            pattern: pattern.into(),
            error,
            remaining: Some(1),
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// User statements that took effect, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state().journal.iter().map(|e| e.sql.clone()).collect()
    }

    pub fn statement_count(&self, pattern: &str) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|e| e.sql.contains(pattern))
            .count()
    }

    /// `None` when the row does not exist, `Some(completed_at)` otherwise.
    pub fn status_row(
        &self,
        table: &TableReference,
        query_id: QueryId,
    ) -> Option<Option<DateTime<Utc>>> {
        self.state()
            .tables
            .get(&table_key(table))
            .and_then(|rows| rows.get(&query_id.to_string()).copied())
    }

    pub fn status_row_count(&self, table: &TableReference) -> usize {
        self.state()
            .tables
            .get(&table_key(table))
            .map_or(0, |rows| rows.len())
    }

    /// Seed a committed status row, creating the table if needed.
    pub fn insert_status_row(
        &self,
        table: &TableReference,
        query_id: QueryId,
        completed_at: Option<DateTime<Utc>>,
    ) {
        self.state()
            .tables
            .entry(table_key(table))
            .or_default()
            .insert(query_id.to_string(), completed_at);
    }

    pub fn is_row_locked(&self, table: &TableReference, query_id: QueryId) -> bool {
        self.state()
            .row_locks
            .contains_key(&(table_key(table), query_id.to_string()))
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge every other connection.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn table_key(table: &TableReference) -> String {
    table.render(&PostgresDialect)
}

impl MemoryState {
    fn now(&self) -> DateTime<Utc> {
        self.frozen_clock.unwrap_or_else(Utc::now)
    }

    fn take_injected_failure(&mut self, sql: &str) -> Option<DriverError> {
        let index = self
            .failures
            .iter()
            .position(|f| sql.contains(&f.pattern))?;
        let failure = &mut self.failures[index];
        let error = failure.error.clone();
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.failures.remove(index);
            }
        }
        Some(error)
    }

    fn rows(&self, table: &str) -> Result<&StatusRows, DriverError> {
        self.tables.get(table).ok_or_else(|| undefined_table(table))
    }

    fn rows_mut(&mut self, table: &str) -> Result<&mut StatusRows, DriverError> {
        self.tables.get_mut(table).ok_or_else(|| undefined_table(table))
    }

    fn check_lock(&self, table: &str, query_id: &str, conn: u64) -> Result<(), DriverError> {
        match self.row_locks.get(&(table.to_string(), query_id.to_string())) {
            Some(owner) if *owner != conn => Err(DriverError::with_code(
                "55P03",
                format!("could not obtain lock on row in relation {}", table),
            )),
            _ => Ok(()),
        }
    }

    fn lock(&mut self, table: &str, query_id: &str, conn: u64) {
        self.row_locks
            .insert((table.to_string(), query_id.to_string()), conn);
    }

    fn release_locks(&mut self, conn: u64) {
        self.row_locks.retain(|_, owner| *owner != conn);
    }

    fn undo(&mut self, change: Change) {
        match change {
            Change::CreateTable { table } => {
                self.tables.remove(&table);
            }
            Change::InsertRow { table, query_id } => {
                if let Some(rows) = self.tables.get_mut(&table) {
                    rows.remove(&query_id);
                }
            }
            Change::UpdateRow {
                table,
                query_id,
                old_completed_at,
            }
            | Change::DeleteRow {
                table,
                query_id,
                old_completed_at,
            } => {
                if let Some(rows) = self.tables.get_mut(&table) {
                    rows.insert(query_id, old_completed_at);
                }
            }
            Change::Journal { seq } => {
                self.journal.retain(|e| e.seq != seq);
            }
        }
    }

    fn finish(&mut self, conn: u64, tx: TxState, commit: bool) {
        if !commit {
            for change in tx.changes.into_iter().rev() {
                self.undo(change);
            }
        }
        self.release_locks(conn);
    }
}

fn undefined_table(table: &str) -> DriverError {
    DriverError::with_code("42P01", format!("relation {} does not exist", table))
}

fn read_only_violation(what: &str) -> DriverError {
    DriverError::with_code(
        "25006",
        format!("cannot execute {} in a read-only transaction", what),
    )
}

fn connection_lost() -> DriverError {
    DriverError::connection_lost("server closed the connection unexpectedly")
}

#[derive(Default)]
struct TxState {
    changes: Vec<Change>,
    read_only: bool,
}

/// One session against a [`MemoryDatabase`].
///
/// Dropping the connection with a transaction open rolls it back and
/// releases its row locks, the way a server does when a client dies.
pub struct MemoryConnection {
    id: u64,
    db: MemoryDatabase,
    tx: Option<TxState>,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn run(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        let conn = self.id;
        let mut state = self.db.state();

        if state.unavailable {
            return Err(connection_lost());
        }
        if let Some(err) = state.take_injected_failure(sql) {
            return Err(err);
        }

        let read_only = self.tx.as_ref().is_some_and(|tx| tx.read_only);
        let in_tx = self.tx.is_some();

        match Statement::parse(sql) {
            Statement::CreateStatusTable { table } => {
                if state.tables.contains_key(&table) {
                    return Ok(QueryResult::empty());
                }
                if read_only {
                    return Err(read_only_violation("CREATE TABLE"));
                }
                state.tables.insert(table.clone(), StatusRows::new());
                record(&mut self.tx, Change::CreateTable { table });
                Ok(QueryResult::empty())
            }

            Statement::SelectStatus {
                table,
                query_id,
                for_update,
            } => {
                if for_update && read_only {
                    return Err(read_only_violation("SELECT FOR UPDATE"));
                }
                let completed_at = state.rows(&table)?.get(&query_id).copied();
                let Some(completed_at) = completed_at else {
                    return Ok(QueryResult::new(vec!["completed_at".into()], Vec::new()));
                };
                if for_update {
                    state.check_lock(&table, &query_id, conn)?;
                    if in_tx {
                        state.lock(&table, &query_id, conn);
                    }
                }
                Ok(QueryResult::new(
                    vec!["completed_at".into()],
                    vec![vec![Value::from(completed_at)]],
                ))
            }

            Statement::InsertIncomplete { table, query_id } => {
                if read_only {
                    return Err(read_only_violation("INSERT"));
                }
                let rows = state.rows_mut(&table)?;
                if rows.contains_key(&query_id) {
                    return Err(DriverError::with_code(
                        "23505",
                        format!(
                            "duplicate key value violates unique constraint on {} (query_id)=({})",
                            table, query_id
                        ),
                    ));
                }
                rows.insert(query_id.clone(), None);
                if in_tx {
                    state.lock(&table, &query_id, conn);
                }
                record(&mut self.tx, Change::InsertRow { table, query_id });
                Ok(QueryResult::affected(1))
            }

            Statement::MarkComplete { table, query_id } => {
                if read_only {
                    return Err(read_only_violation("UPDATE"));
                }
                let now = state.now();
                if !state.rows(&table)?.contains_key(&query_id) {
                    return Ok(QueryResult::affected(0));
                }
                state.check_lock(&table, &query_id, conn)?;
                let old_completed_at = state
                    .rows_mut(&table)?
                    .insert(query_id.clone(), Some(now))
                    .flatten();
                if in_tx {
                    state.lock(&table, &query_id, conn);
                }
                record(&mut self.tx, Change::UpdateRow {
                    table,
                    query_id,
                    old_completed_at,
                });
                Ok(QueryResult::affected(1))
            }

            Statement::DeleteCompletedBefore { table, cutoff } => {
                if read_only {
                    return Err(read_only_violation("DELETE"));
                }
                delete_completed_before(conn, &mut self.tx, &mut state, table, cutoff)
            }

            Statement::DeleteExpired {
                table,
                retention_secs,
            } => {
                if read_only {
                    return Err(read_only_violation("DELETE"));
                }
                let cutoff = state.now() - chrono::Duration::seconds(retention_secs);
                delete_completed_before(conn, &mut self.tx, &mut state, table, cutoff)
            }

            Statement::SetReadOnly => {
                match self.tx.as_mut() {
                    Some(tx) => tx.read_only = true,
                    None => {
                        return Err(DriverError::with_code(
                            "25P01",
                            "SET TRANSACTION can only be used in transaction blocks",
                        ));
                    }
                }
                Ok(QueryResult::empty())
            }

            Statement::Other { is_write, is_select } => {
                if read_only && is_write {
                    return Err(read_only_violation(sql.trim()));
                }
                if is_select {
                    return Ok(QueryResult::empty());
                }
                state.next_journal_seq += 1;
                let seq = state.next_journal_seq;
                state.journal.push(JournalEntry {
                    seq,
                    sql: sql.trim().to_string(),
                });
                record(&mut self.tx, Change::Journal { seq });
                Ok(QueryResult::affected(1))
            }
        }
    }

    fn end_transaction(&mut self, commit: bool) -> Result<(), DriverError> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        let mut state = self.db.state();
        if state.unavailable {
            // The server aborts the transaction on its side regardless.
            state.finish(self.id, tx, false);
            return Err(connection_lost());
        }
        state.finish(self.id, tx, commit);
        Ok(())
    }
}

fn record(tx: &mut Option<TxState>, change: Change) {
    if let Some(tx) = tx.as_mut() {
        tx.changes.push(change);
    }
}

fn delete_completed_before(
    conn: u64,
    tx: &mut Option<TxState>,
    state: &mut MemoryState,
    table: String,
    cutoff: DateTime<Utc>,
) -> Result<QueryResult, DriverError> {
    let expired: Vec<(String, Option<DateTime<Utc>>)> = state
        .rows(&table)?
        .iter()
        .filter(|(_, completed_at)| completed_at.is_some_and(|c| c < cutoff))
        .map(|(id, completed_at)| (id.clone(), *completed_at))
        .collect();

    for (query_id, _) in &expired {
        state.check_lock(&table, query_id, conn)?;
    }

    let rows = state.rows_mut(&table)?;
    for (query_id, _) in &expired {
        rows.remove(query_id);
    }

    let deleted = expired.len() as u64;
    for (query_id, old_completed_at) in expired {
        record(
            tx,
            Change::DeleteRow {
                table: table.clone(),
                query_id,
                old_completed_at,
            },
        );
    }
    Ok(QueryResult::affected(deleted))
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        self.run(sql)
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        if self.db.state().unavailable {
            return Err(connection_lost());
        }
        if self.tx.is_some() {
            return Err(DriverError::with_code(
                "25001",
                "there is already a transaction in progress",
            ));
        }
        self.tx = Some(TxState::default());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.end_transaction(true)
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.end_transaction(false)
    }

    fn is_in_transaction(&self) -> bool {
        self.tx.is_some()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.db.state().finish(self.id, tx, false);
        }
    }
}
