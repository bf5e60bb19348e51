//! `tokio-postgres` adapter.

use super::Connection;
use crate::core::{DriverError, Value};
use crate::result::QueryResult;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

/// A single Postgres session.
///
/// Statements go through the simple query protocol so that arbitrary user
/// statements (including multi-statement scripts) can be executed without
/// preparing them. Every column comes back as text; `NULL` stays `Value::Null`.
pub struct PgConnection {
    client: tokio_postgres::Client,
    in_transaction: bool,
    driver: JoinHandle<()>,
}

impl PgConnection {
    /// Connect with a libpq-style connection string.
    pub async fn connect(config: &str) -> Result<Self, DriverError> {
        let (client, connection) = tokio_postgres::connect(config, NoTls)
            .await
            .map_err(map_pg_error)?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Postgres connection error: {}", e);
            }
        });

        debug!("Postgres connection established");
        Ok(Self::from_parts(client, driver))
    }

    /// Wrap a client whose connection future is already being driven.
    pub fn from_parts(client: tokio_postgres::Client, driver: JoinHandle<()>) -> Self {
        Self {
            client,
            in_transaction: false,
            driver,
        }
    }

    async fn simple(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        let messages = self.client.simple_query(sql).await.map_err(map_pg_error)?;

        let mut result = QueryResult::empty();
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if result.columns.is_empty() {
                        result.columns = row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect();
                    }
                    let values = (0..row.len())
                        .map(|i| match row.get(i) {
                            Some(text) => Value::Text(text.to_string()),
                            None => Value::Null,
                        })
                        .collect();
                    result.rows.push(values);
                }
                SimpleQueryMessage::CommandComplete(count) => {
                    result.affected_rows += count;
                }
                _ => {}
            }
        }
        Ok(result)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        // Closing the session makes the server roll back anything still open.
        self.driver.abort();
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        self.simple(sql).await
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            return Err(DriverError::with_code(
                "25001",
                "there is already a transaction in progress",
            ));
        }
        self.simple("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        // The server ends the transaction even when COMMIT fails.
        self.in_transaction = false;
        self.simple("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.in_transaction = false;
        self.simple("ROLLBACK").await.map(|_| ())
    }

    fn is_in_transaction(&self) -> bool {
        self.in_transaction
    }
}

fn map_pg_error(err: tokio_postgres::Error) -> DriverError {
    if err.is_closed() {
        return DriverError::connection_lost(err.to_string());
    }
    match err.as_db_error() {
        Some(db) => DriverError::with_code(db.code().code(), db.message()),
        None => match err.code() {
            Some(state) => DriverError::with_code(state.code(), err.to_string()),
            // No SQLSTATE and not a server error: socket or protocol failure.
            None => DriverError::connection_lost(err.to_string()),
        },
    }
}
