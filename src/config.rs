use crate::core::Result;
use crate::dialect::TableReference;
use crate::executor::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_STATUS_TABLE: &str = "__idemsql_status";

/// Coordinator configuration
///
/// Durations are written as whole seconds when (de)serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Schema holding the status table; the connection's default when unset
    pub status_table_schema: Option<String>,

    /// Status table name
    pub status_table: String,

    /// How long a completed status row is kept
    #[serde(with = "duration_secs")]
    pub retention: Duration,

    /// Track statements in the status table. When false, statements run
    /// directly with no at-most-once guarantee.
    pub strict_transaction: bool,

    /// Backoff applied to conflicts
    pub retry: RetryPolicy,

    /// Period of the background sweeper
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            status_table_schema: None,
            status_table: DEFAULT_STATUS_TABLE.to_string(),
            retention: Duration::from_secs(24 * 60 * 60),
            strict_transaction: true,
            retry: RetryPolicy::default(),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status table schema
    pub fn status_table_schema(mut self, schema: &str) -> Self {
        self.status_table_schema = Some(schema.to_string());
        self
    }

    /// Set the status table name
    pub fn status_table(mut self, table: &str) -> Self {
        self.status_table = table.to_string();
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn strict_transaction(mut self, strict: bool) -> Self {
        self.strict_transaction = strict;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn table_reference(&self) -> Result<TableReference> {
        TableReference::with_optional_schema(
            self.status_table_schema.as_deref(),
            &self.status_table,
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.table_reference().map_err(|e| e.to_string())?;

        if self.retention.is_zero() {
            return Err("retention must be > 0".to_string());
        }

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be > 0".to_string());
        }

        self.retry.validate()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
