// ============================================================================
// Status Table
// ============================================================================
//
// One row per logical query: `query_id` (primary key) and a nullable
// `completed_at`. A row with no `completed_at` is either being worked on or
// was abandoned; a row with `completed_at` set means the statement already
// took effect.
//
// ============================================================================

pub mod lock;
pub mod row;
pub mod store;

pub use lock::{Check, LockCoordinator};
pub use row::{LockState, StatusRow};
pub use store::StatusStore;
