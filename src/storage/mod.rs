pub mod engine;
pub mod error;
pub mod partition;

pub use engine::{ChangesOptions, DocInfo, Document, PartitionHandle, PartitionStore};
pub use error::{StorageError, StorageResult};
pub use partition::{FileStore, PartitionFile, PartitionRecord, PartitionWriter};
