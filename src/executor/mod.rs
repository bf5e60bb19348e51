// ============================================================================
// Idempotent Execution
// ============================================================================
//
// CHECK -> {SKIP, RUN} -> COMMIT -> DONE
//
// CHECK classifies the status row under a non-blocking lock and, for a new
// query id, claims it with an incomplete row. RUN executes the caller's
// statement with no bookkeeping transaction open. COMMIT stamps
// `completed_at`. A conflict at CHECK hands control back to the caller.
//
// ============================================================================

pub mod idempotent;
pub mod retry;

pub use idempotent::{IdempotentExecutor, Outcome};
pub use retry::RetryPolicy;
