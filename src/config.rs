use crate::design::ReduceSourcePolicy;
use std::path::{Path, PathBuf};

pub const DEFAULT_EXTENSION: &str = "couch";
pub const DEFAULT_MASTER_BASE: &str = "master";
pub const DEFAULT_STATE_RECORD: &str = "_local/vbstate";

/// Indexer run configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Directory holding the partition files and the master file
    pub store_dir: PathBuf,

    /// Id of the design document to evaluate, looked up in the master file
    pub design_doc_id: String,

    /// Accepted for command-line compatibility; nothing is written there
    pub output_dir: Option<PathBuf>,

    /// Partition file extension, files are named `<name>.<ext>.<rev>`
    pub extension: String,

    /// Base name of the master file
    pub master_base: String,

    /// Local record holding a partition's replication state
    pub state_record: String,

    pub reduce_policy: ReduceSourcePolicy,
}

impl IndexerConfig {
    pub fn new<P: AsRef<Path>>(store_dir: P, design_doc_id: &str) -> Self {
        Self {
            store_dir: store_dir.as_ref().to_path_buf(),
            design_doc_id: design_doc_id.to_string(),
            output_dir: None,
            extension: DEFAULT_EXTENSION.to_string(),
            master_base: DEFAULT_MASTER_BASE.to_string(),
            state_record: DEFAULT_STATE_RECORD.to_string(),
            reduce_policy: ReduceSourcePolicy::default(),
        }
    }

    pub fn output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn master_base(mut self, base: &str) -> Self {
        self.master_base = base.to_string();
        self
    }

    pub fn state_record(mut self, name: &str) -> Self {
        self.state_record = name.to_string();
        self
    }

    pub fn reduce_policy(mut self, policy: ReduceSourcePolicy) -> Self {
        self.reduce_policy = policy;
        self
    }
}
