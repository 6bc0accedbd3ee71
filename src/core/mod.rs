pub mod error;
pub mod types;

pub use error::{EXIT_USAGE, MappleError, Result};
pub use types::{MapResult, PartitionState, ViewDefinition};
