use super::Value;
use uuid::Uuid;

pub type Row = Vec<Value>;

/// Caller-supplied identifier of one logical query.
///
/// Must stay the same across every retry of that query.
pub type QueryId = Uuid;
