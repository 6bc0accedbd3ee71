// ============================================================================
// Mapple Library
// ============================================================================

pub mod config;
pub mod core;
pub mod design;
pub mod document;
pub mod evaluator;
pub mod indexer;
pub mod partition;
pub mod storage;

// Re-export main types for convenience
pub use config::IndexerConfig;
pub use core::{EXIT_USAGE, MapResult, MappleError, PartitionState, Result, ViewDefinition};
pub use design::{DesignDoc, ReduceSourcePolicy};
pub use evaluator::{EvalError, MapContext, MapEngine, ScriptContext, ScriptEngine};
pub use indexer::{CollectingSink, EmittedRow, NullSink, ResultSink, RunSummary, ViewIndexer, WriterSink};
pub use storage::{FileStore, PartitionFile, PartitionHandle, PartitionStore, PartitionWriter, StorageError};

/// Build a view index over the partitions in `config.store_dir` with the
/// built-in file store and script engine.
///
/// # Examples
///
/// ```no_run
/// use mapple::{IndexerConfig, WriterSink};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IndexerConfig::new("/var/lib/bucket", "_design/beers");
/// let summary = mapple::index(config, &mut WriterSink::new(std::io::stdout()))?;
/// println!("{} pairs emitted", summary.emitted);
/// # Ok(())
/// # }
/// ```
pub fn index(config: IndexerConfig, sink: &mut dyn ResultSink) -> Result<RunSummary> {
    ViewIndexer::new(config, FileStore, ScriptEngine).run(sink)
}
