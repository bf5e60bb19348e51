use super::{IdempotentExecutor, Outcome};
use crate::connection::Connection;
use crate::core::{QueryId, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Backoff applied when a run reports `Outcome::Conflict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry, doubled for each further one.
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// A single attempt; conflicts are returned to the caller as they are.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retrying after the given (1-based) attempt.
    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let base = self.base_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        backoff
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry max_attempts must be at least 1".into());
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(format!(
                "retry max_backoff_ms ({}) is smaller than base_backoff_ms ({})",
                self.max_backoff_ms, self.base_backoff_ms
            ));
        }
        Ok(())
    }
}

impl IdempotentExecutor {
    /// Like [`run`](IdempotentExecutor::run), but retries conflicts with
    /// the executor's backoff policy. Errors are never retried.
    pub async fn run_with_retry<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        query_id: QueryId,
        sql: &str,
    ) -> Result<Outcome> {
        let policy = self.retry_policy();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.run(conn, query_id, sql).await?;
            if outcome != Outcome::Conflict || attempt >= max_attempts {
                return Ok(outcome);
            }

            let backoff_ms = policy.backoff_ms(attempt);
            warn!(
                "Query {} retry on conflict (attempt {} of {}) (backoff={}ms)",
                query_id, attempt, max_attempts, backoff_ms
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            attempt += 1;
        }
    }
}
