use thiserror::Error;
use uuid::Uuid;

/// Error reported by a database driver.
///
/// `code` is the vendor error code (SQLSTATE for Postgres, the numeric
/// server code for MySQL). Adapters set `connection_lost` when the
/// session itself is gone, independent of any code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    code: Option<String>,
    message: String,
    connection_lost: bool,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            connection_lost: true,
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost
    }
}

/// Errors surfaced by the coordination layer.
///
/// Raw driver errors never cross the status-store boundary; they are
/// classified into one of these variants first.
#[derive(Error, Debug)]
pub enum TxError {
    /// The status row is locked by another live attempt, or another
    /// attempt claimed it first. Retry later.
    #[error("Lock conflict while trying to {context}: {source}")]
    LockConflict {
        context: String,
        #[source]
        source: DriverError,
    },

    /// The caller's statement failed. The status row stays incomplete.
    #[error("Statement for query {query_id} failed: {source}")]
    StatementFailed {
        query_id: Uuid,
        #[source]
        source: DriverError,
    },

    #[error("Database unavailable while trying to {context}: {source}")]
    DatabaseUnavailable {
        context: String,
        #[source]
        source: DriverError,
    },

    /// The status table could not be created or accessed.
    #[error("Status table error while trying to {context}: {reason}")]
    SchemaError {
        context: String,
        reason: String,
        #[source]
        source: Option<DriverError>,
    },

    #[error("Statement is not read-only: {source}")]
    NotReadOnly {
        #[source]
        source: DriverError,
    },

    /// A read-only query failed for a reason other than attempting a write.
    #[error("Read-only query failed: {source}")]
    QueryFailed {
        #[source]
        source: DriverError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Background task failed: {0}")]
    BackgroundTask(String),
}

impl TxError {
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// Whether re-invoking with the same query id is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict { .. } | Self::StatementFailed { .. })
    }

    /// The underlying driver error, when there is one.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::LockConflict { source, .. }
            | Self::StatementFailed { source, .. }
            | Self::DatabaseUnavailable { source, .. }
            | Self::NotReadOnly { source }
            | Self::QueryFailed { source } => Some(source),
            Self::SchemaError { source, .. } => source.as_ref(),
            Self::InvalidConfig(_) | Self::BackgroundTask(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_driver_error_accessors() {
        let err = DriverError::with_code("55P03", "could not obtain lock");
        assert_eq!(err.code(), Some("55P03"));
        assert_eq!(err.message(), "could not obtain lock");
        assert!(!err.is_connection_lost());

        let lost = DriverError::connection_lost("connection closed");
        assert_eq!(lost.code(), None);
        assert!(lost.is_connection_lost());
    }

    #[test]
    fn test_retryable_classification() {
        let conflict = TxError::LockConflict {
            context: "lock status row".into(),
            source: DriverError::with_code("55P03", "locked"),
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_lock_conflict());

        let unavailable = TxError::DatabaseUnavailable {
            context: "begin".into(),
            source: DriverError::connection_lost("gone"),
        };
        assert!(!unavailable.is_retryable());

        let schema = TxError::SchemaError {
            context: "create status table".into(),
            reason: "permission denied".into(),
            source: None,
        };
        assert!(!schema.is_retryable());
        assert!(schema.driver_error().is_none());
    }

    #[test]
    fn test_statement_failure_keeps_original_cause() {
        let err = TxError::StatementFailed {
            query_id: Uuid::nil(),
            source: DriverError::with_code("42601", "syntax error at or near \"SELEC\""),
        };
        let cause = err.source().expect("source is preserved");
        assert_eq!(cause.to_string(), "syntax error at or near \"SELEC\"");
        assert!(err.to_string().contains("00000000-0000-0000-0000-000000000000"));
    }
}
