pub mod error;
pub mod types;
pub mod value;

pub use error::{DriverError, Result, TxError};
pub use types::{QueryId, Row};
pub use value::Value;
