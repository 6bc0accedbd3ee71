use crate::evaluator::EvalError;
use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MappleError {
    #[error("Malformed revision metadata: expected at least {expected} bytes, got {actual}")]
    MalformedMetadata { expected: usize, actual: usize },

    #[error("Invalid partition state document: {0}")]
    InvalidStateDocument(String),

    #[error("Expected exactly one file matching '{pattern}', found {matches}")]
    AmbiguousOrMissingFile { pattern: String, matches: usize },

    #[error("Stored body of document '{doc_id}' is not a JSON object: {reason}")]
    MalformedStoredBody { doc_id: String, reason: String },

    #[error("Could not open master db '{location}': {reason}")]
    MasterUnavailable { location: String, reason: String },

    #[error("Could not find design doc '{0}' in master db")]
    DesignDocumentNotFound(String),

    #[error("Map function initialization failed: {0}")]
    EvaluatorInitFailed(#[source] EvalError),

    #[error("Map evaluation failed for document '{doc_id}' in {}: {source}", partition.display())]
    Evaluation {
        partition: PathBuf,
        doc_id: String,
        #[source]
        source: EvalError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MappleError>;

/// Exit status for usage errors (bad or missing arguments).
pub const EXIT_USAGE: i32 = -1;

impl MappleError {
    /// Process exit status reported by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MasterUnavailable { .. } | Self::AmbiguousOrMissingFile { .. } => -2,
            Self::EvaluatorInitFailed(_) | Self::Evaluation { .. } => -3,
            Self::Storage(_) => -4,
            Self::DesignDocumentNotFound(_) => -5,
            Self::MalformedStoredBody { .. }
            | Self::MalformedMetadata { .. }
            | Self::InvalidStateDocument(_) => -6,
            Self::Io { .. } | Self::Pattern(_) => -7,
        }
    }
}
