pub mod error;
pub mod types;
pub mod value;

pub use error::{BatchError, FieldErrors, Result};
pub use types::{Column, DataType, Row, TableSchema};
pub use value::Value;
