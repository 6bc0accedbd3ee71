//! View evaluation driver.
//!
//! A run resolves the master file, reads the design document from it,
//! compiles every view's map function once, then feeds each document of
//! each active partition through the compiled functions:
//!
//! ```text
//! master file ─> design doc ─> map sources ─> MapEngine::init
//!                                                   │
//! active partitions ─> changes ─> reconstruct ─> map_doc ─> ResultSink
//! ```
//!
//! The first error ends the run. Pairs already handed to the sink stay
//! there.

pub mod sink;

pub use sink::{CollectingSink, EmittedRow, NullSink, ResultSink, WriterSink};

use crate::config::IndexerConfig;
use crate::core::{MappleError, Result};
use crate::design::DesignDoc;
use crate::document::reconstruct;
use crate::evaluator::{MapContext, MapEngine};
use crate::partition::{find_active_partitions, find_single_file};
use crate::storage::{ChangesOptions, DocInfo, PartitionHandle, PartitionStore, StorageError};
use std::path::Path;
use tracing::{debug, info};

/// Counts for a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub partitions: usize,
    pub documents: usize,
    pub emitted: usize,
}

pub struct ViewIndexer<S: PartitionStore, E: MapEngine> {
    config: IndexerConfig,
    store: S,
    engine: E,
}

impl<S: PartitionStore, E: MapEngine> ViewIndexer<S, E> {
    pub fn new(config: IndexerConfig, store: S, engine: E) -> Self {
        Self { config, store, engine }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn run(&self, sink: &mut dyn ResultSink) -> Result<RunSummary> {
        let design_doc = self.load_design_doc()?;

        let mut views = Vec::new();
        let mut sources = Vec::new();
        for (name, source) in design_doc.map_sources() {
            views.push(name);
            sources.push(source);
        }

        let mut context = self.engine.init(&sources).map_err(MappleError::EvaluatorInitFailed)?;
        debug!(functions = context.function_count(), "map functions compiled");

        if let Some(output_dir) = &self.config.output_dir {
            info!(path = %output_dir.display(), "output directory is accepted but not written to");
        }

        let partitions = find_active_partitions(
            &self.store,
            &self.config.store_dir,
            &self.config.extension,
            &self.config.state_record,
        )?;
        info!(count = partitions.len(), "active partitions found");

        let mut summary = RunSummary::default();
        for path in &partitions {
            let handle = self.store.open_partition(path)?;
            let before = summary;
            index_partition(&handle, &mut context, &views, sink, &mut summary)?;
            summary.partitions += 1;
            info!(
                path = %path.display(),
                documents = summary.documents - before.documents,
                emitted = summary.emitted - before.emitted,
                "partition indexed"
            );
        }

        Ok(summary)
    }

    /// Resolve and open the master file, then parse the design document
    /// stored in it. The master handle is closed before returning.
    fn load_design_doc(&self) -> Result<DesignDoc> {
        let dir = &self.config.store_dir;
        let master_path = find_single_file(&self.config.master_base, dir, &self.config.extension).map_err(|e| {
            MappleError::MasterUnavailable {
                location: dir.join(format!("{}.{}.*", self.config.master_base, self.config.extension))
                    .display()
                    .to_string(),
                reason: e.to_string(),
            }
        })?;
        info!(path = %master_path.display(), "using master file");

        let master = self
            .store
            .open_partition(&master_path)
            .map_err(|e| MappleError::MasterUnavailable {
                location: master_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let ddoc = match master.open_doc_by_id(&self.config.design_doc_id) {
            Ok(doc) => doc,
            Err(StorageError::NotFound(_)) => {
                return Err(MappleError::DesignDocumentNotFound(self.config.design_doc_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        drop(master);

        let design_doc = DesignDoc::parse_with(&String::from_utf8_lossy(&ddoc.body), self.config.reduce_policy);
        info!(id = %self.config.design_doc_id, views = design_doc.len(), "loaded design document");
        for view in design_doc.views() {
            info!(view = %view.name, map = %view.map_source, "view");
            if view.has_reduce() {
                info!(view = %view.name, reduce = %view.reduce_source, "view reduce");
            }
        }

        Ok(design_doc)
    }
}

/// Run every live document of one partition through the compiled
/// functions. `views[i]` names the view of the context's i-th function.
fn index_partition<H, C>(
    handle: &H,
    context: &mut C,
    views: &[String],
    sink: &mut dyn ResultSink,
    summary: &mut RunSummary,
) -> Result<()>
where
    H: PartitionHandle,
    C: MapContext,
{
    let partition = handle.path();

    handle.changes_since(0, ChangesOptions::no_deletes(), &mut |info: &DocInfo| {
        let doc = handle.open_doc(info)?;
        let logical = reconstruct(&doc.body, &info.id, info.rev_seq, &info.rev_meta)?;
        debug!(doc_id = %info.id, seq = info.db_seq, "mapping document");

        let results = context.map_doc(&logical).map_err(|source| MappleError::Evaluation {
            partition: partition.to_path_buf(),
            doc_id: info.id.clone(),
            source,
        })?;

        for (view, emitted) in views.iter().zip(&results) {
            for result in emitted {
                report(sink, partition, &info.id, view, result)?;
                summary.emitted += 1;
            }
        }
        summary.documents += 1;
        Ok::<(), MappleError>(())
    })
}

fn report(
    sink: &mut dyn ResultSink,
    partition: &Path,
    doc_id: &str,
    view: &str,
    result: &crate::core::MapResult,
) -> Result<()> {
    sink.emit(partition, doc_id, view, result).map_err(|e| MappleError::Io {
        path: partition.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ScriptEngine;
    use crate::storage::{FileStore, PartitionWriter};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ZERO_META: [u8; 16] = [0u8; 16];

    fn write_master(dir: &Path, ddoc: &str) {
        let mut writer = PartitionWriter::open(dir.join("master.couch.1")).unwrap();
        writer.save_doc("_design/test", ddoc.as_bytes(), 1, &ZERO_META).unwrap();
    }

    fn write_partition(dir: &Path, name: &str, state: &str, docs: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = PartitionWriter::open(&path).unwrap();
        writer
            .set_local("_local/vbstate", &format!(r#"{{"state":"{}"}}"#, state))
            .unwrap();
        for (id, body) in docs {
            writer.save_doc(id, body.as_bytes(), 1, &ZERO_META).unwrap();
        }
        path
    }

    fn indexer(dir: &Path) -> ViewIndexer<FileStore, ScriptEngine> {
        ViewIndexer::new(IndexerConfig::new(dir, "_design/test"), FileStore, ScriptEngine)
    }

    #[test]
    fn test_views_are_paired_with_their_functions() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_master(
            dir,
            r#"{"views":{
                "b_values":{"map":"function(doc){emit(doc.a, null)}"},
                "a_ids":{"map":"function(doc){emit(doc._id, 1)}"}
            }}"#,
        );
        write_partition(dir, "0.couch.1", "active", &[("doc1", r#"{"a":7}"#)]);

        let mut sink = CollectingSink::new();
        let summary = indexer(dir).run(&mut sink).unwrap();

        assert_eq!(
            summary,
            RunSummary {
                partitions: 1,
                documents: 1,
                emitted: 2
            }
        );
        let views: Vec<_> = sink.rows.iter().map(|row| row.view.as_str()).collect();
        assert_eq!(views, vec!["a_ids", "b_values"]);
        assert_eq!(
            sink.pairs(),
            vec![
                ("\"doc1\"".to_string(), "1".to_string()),
                ("7".to_string(), "null".to_string()),
            ]
        );
    }

    #[test]
    fn test_system_fields_are_visible_to_map_functions() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_master(
            dir,
            r#"{"views":{"meta":{"map":"function(doc){emit(doc._rev, [doc.$expiration, doc.$flags])}"}}}"#,
        );
        let path = dir.join("0.couch.1");
        let mut writer = PartitionWriter::open(&path).unwrap();
        writer.set_local("_local/vbstate", r#"{"state":"active"}"#).unwrap();
        let meta = [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 9, 0, 0, 0, 2];
        writer.save_doc("doc1", b"{}", 3, &meta).unwrap();
        drop(writer);

        let mut sink = CollectingSink::new();
        indexer(dir).run(&mut sink).unwrap();

        assert_eq!(
            sink.pairs(),
            vec![("\"3-00000000000000010000000900000002\"".to_string(), "[9,2]".to_string())]
        );
    }

    #[test]
    fn test_deleted_documents_are_not_mapped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_master(dir, r#"{"views":{"v":{"map":"function(doc){emit(doc._id, null)}"}}}"#);
        let path = write_partition(dir, "0.couch.1", "active", &[("gone", "{}"), ("kept", "{}")]);
        let mut writer = PartitionWriter::open(&path).unwrap();
        writer.delete_doc("gone", 2, &ZERO_META).unwrap();
        drop(writer);

        let mut sink = CollectingSink::new();
        let summary = indexer(dir).run(&mut sink).unwrap();

        assert_eq!(summary.documents, 1);
        assert_eq!(sink.pairs(), vec![("\"kept\"".to_string(), "null".to_string())]);
    }

    #[test]
    fn test_design_doc_without_map_functions() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_master(dir, r#"{"language":"javascript"}"#);
        write_partition(dir, "0.couch.1", "active", &[("doc1", "{}")]);

        let mut sink = CollectingSink::new();
        let summary = indexer(dir).run(&mut sink).unwrap();

        assert_eq!(summary.partitions, 1);
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.emitted, 0);
        assert!(sink.rows.is_empty());
    }

    #[test]
    fn test_malformed_stored_body_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_master(dir, r#"{"views":{"v":{"map":"function(doc){emit(doc._id, null)}"}}}"#);
        write_partition(dir, "0.couch.1", "active", &[("ok", "{}"), ("bad", "[1,2]")]);

        let mut sink = CollectingSink::new();
        let err = indexer(dir).run(&mut sink).unwrap_err();

        assert!(matches!(err, MappleError::MalformedStoredBody { ref doc_id, .. } if doc_id == "bad"));
        assert_eq!(err.exit_code(), -6);
        assert_eq!(sink.pairs(), vec![("\"ok\"".to_string(), "null".to_string())]);
    }

    #[test]
    fn test_ambiguous_master() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_master(dir, "{}");
        PartitionWriter::open(dir.join("master.couch.2")).unwrap();

        let err = indexer(dir).run(&mut CollectingSink::new()).unwrap_err();
        assert!(matches!(err, MappleError::MasterUnavailable { .. }));
        assert_eq!(err.exit_code(), -2);
    }
}
