pub mod change;
pub mod memory;
pub mod statement;

pub use change::Change;
pub use memory::{MemoryConnection, MemoryDatabase};
pub use statement::Statement;
