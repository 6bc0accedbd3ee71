use super::error::StorageResult;
use std::path::Path;

/// Summary of the latest revision of one document, as seen by change iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocInfo {
    pub id: String,
    /// Position in the partition's change history (1-based).
    pub db_seq: u64,
    pub rev_seq: u64,
    pub rev_meta: Vec<u8>,
    pub deleted: bool,
}

/// A fetched document body. Bodies are handed out decompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangesOptions {
    pub include_deletes: bool,
}

impl ChangesOptions {
    pub fn no_deletes() -> Self {
        Self {
            include_deletes: false,
        }
    }

    pub fn with_deletes() -> Self {
        Self {
            include_deletes: true,
        }
    }
}

/// Storage backend that opens partition files by path.
pub trait PartitionStore {
    type Handle: PartitionHandle;

    fn open_partition(&self, path: &Path) -> StorageResult<Self::Handle>;
}

/// An open partition. Dropping the handle closes it.
pub trait PartitionHandle {
    fn path(&self) -> &Path;

    /// Read a local (non-replicated) record such as `_local/vbstate`.
    fn read_local(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Visit the latest revision of every document changed after `since`,
    /// in change order. An error from `visit` stops the iteration and is
    /// returned unchanged.
    fn changes_since<E>(
        &self,
        since: u64,
        options: ChangesOptions,
        visit: &mut dyn FnMut(&DocInfo) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<super::StorageError>;

    fn open_doc(&self, info: &DocInfo) -> StorageResult<Document>;

    fn open_doc_by_id(&self, id: &str) -> StorageResult<Document>;
}
