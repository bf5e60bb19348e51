#[cfg(feature = "postgres")]
pub mod postgres;

use crate::core::DriverError;
use crate::result::QueryResult;
use async_trait::async_trait;

/// Database connection handle consumed by the coordination layer.
///
/// Implement this for whatever driver the host already uses. The
/// coordinator never keeps a transaction open across calls, and it only
/// inspects `DriverError::code` to tell lock and key conflicts apart from
/// every other failure.
///
/// # Examples
///
/// ```ignore
/// conn.begin().await?;
/// conn.execute("INSERT INTO ledger VALUES (1, 100)").await?;
/// conn.commit().await?;
/// ```
#[async_trait]
pub trait Connection: Send {
    /// Execute one SQL statement.
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, DriverError>;

    async fn begin(&mut self) -> Result<(), DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Check if a transaction is currently open on this connection
    fn is_in_transaction(&self) -> bool;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Box<C> {
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        (**self).execute(sql).await
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        (**self).begin().await
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        (**self).rollback().await
    }

    fn is_in_transaction(&self) -> bool {
        (**self).is_in_transaction()
    }
}
