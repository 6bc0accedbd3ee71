//! End-to-end tests for the view indexer over on-disk partition files

use mapple::{
    CollectingSink, FileStore, IndexerConfig, MappleError, PartitionFile, PartitionStore, PartitionWriter,
    ReduceSourcePolicy, RunSummary, ScriptEngine, StorageError, ViewIndexer, WriterSink,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DDOC_ID: &str = "_design/test";
const ZERO_META: [u8; 16] = [0u8; 16];

fn write_master(dir: &Path, ddoc: &str) {
    let mut writer = PartitionWriter::open(dir.join("master.couch.1")).unwrap();
    writer.save_doc(DDOC_ID, ddoc.as_bytes(), 1, &ZERO_META).unwrap();
    writer.flush().unwrap();
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
    writer.flush().unwrap();
    path
}

fn by_id_and_a(dir: &Path) {
    write_master(dir, r#"{"views":{"v":{"map":"function(doc){emit(doc._id, doc.a)}"}}}"#);
}

fn pair(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// File store that refuses to open `path` after it has been opened `allowed` times.
struct FailingStore {
    path: PathBuf,
    allowed: usize,
    opens: RefCell<HashMap<PathBuf, usize>>,
}

impl FailingStore {
    fn new(path: PathBuf, allowed: usize) -> Self {
        Self {
            path,
            allowed,
            opens: RefCell::new(HashMap::new()),
        }
    }
}

impl PartitionStore for FailingStore {
    type Handle = PartitionFile;

    fn open_partition(&self, path: &Path) -> Result<PartitionFile, StorageError> {
        let mut opens = self.opens.borrow_mut();
        let count = opens.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        if path == self.path && *count > self.allowed {
            return Err(StorageError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected failure"),
            ));
        }
        FileStore.open_partition(path)
    }
}

#[test]
fn test_two_documents_emit_in_change_order() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    by_id_and_a(dir);
    write_partition(dir, "0.couch.1", "active", &[("doc1", r#"{"a":1}"#), ("doc2", r#"{"a":2}"#)]);

    let mut sink = CollectingSink::new();
    let summary = mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap();

    assert_eq!(
        summary,
        RunSummary {
            partitions: 1,
            documents: 2,
            emitted: 2
        }
    );
    assert_eq!(sink.pairs(), vec![pair("\"doc1\"", "1"), pair("\"doc2\"", "2")]);
    assert!(sink.rows.iter().all(|row| row.view == "v"));
    assert_eq!(sink.rows[1].doc_id, "doc2");
}

#[test]
fn test_writer_sink_output() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    by_id_and_a(dir);
    write_partition(dir, "0.couch.1", "active", &[("doc1", r#"{"a":1}"#), ("doc2", r#"{"a":2}"#)]);

    let mut sink = WriterSink::new(Vec::new());
    mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap();

    let out = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(out, "Emitted item: `\"doc1\"', `1'\nEmitted item: `\"doc2\"', `2'\n");
}

#[test]
fn test_only_active_partitions_are_indexed() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    by_id_and_a(dir);
    let first = write_partition(dir, "0.couch.1", "active", &[("a0", r#"{"a":0}"#)]);
    write_partition(dir, "1.couch.1", "replica", &[("r1", r#"{"a":1}"#)]);
    write_partition(dir, "2.couch.3", "dead", &[("d2", r#"{"a":2}"#)]);
    let last = write_partition(dir, "3.couch.1", "active", &[("a3", r#"{"a":3}"#)]);

    let mut sink = CollectingSink::new();
    let summary = mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap();

    assert_eq!(summary.partitions, 2);
    assert_eq!(sink.pairs(), vec![pair("\"a0\"", "0"), pair("\"a3\"", "3")]);
    assert_eq!(sink.rows[0].partition, first);
    assert_eq!(sink.rows[1].partition, last);
}

#[test]
fn test_storage_failure_on_second_partition_keeps_first_results() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    by_id_and_a(dir);
    write_partition(dir, "0.couch.1", "active", &[("doc1", r#"{"a":1}"#), ("doc2", r#"{"a":2}"#)]);
    let second = write_partition(dir, "1.couch.1", "active", &[("doc3", r#"{"a":3}"#)]);

    // Discovery opens the second partition once; the evaluation pass fails.
    let store = FailingStore::new(second, 1);
    let indexer = ViewIndexer::new(IndexerConfig::new(dir, DDOC_ID), store, ScriptEngine);

    let mut sink = CollectingSink::new();
    let err = indexer.run(&mut sink).unwrap_err();

    assert!(matches!(err, MappleError::Storage(StorageError::Io { .. })));
    assert_eq!(err.exit_code(), -4);
    assert_eq!(sink.pairs(), vec![pair("\"doc1\"", "1"), pair("\"doc2\"", "2")]);
}

#[test]
fn test_missing_master() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_partition(dir, "0.couch.1", "active", &[("doc1", "{}")]);

    let mut sink = CollectingSink::new();
    let err = mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap_err();

    assert!(matches!(err, MappleError::MasterUnavailable { .. }));
    assert_eq!(err.exit_code(), -2);
    assert!(sink.rows.is_empty());
}

#[test]
fn test_master_with_custom_base_and_extension() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let mut writer = PartitionWriter::open(dir.join("meta.store.7")).unwrap();
    writer
        .save_doc(DDOC_ID, br#"{"views":{"v":{"map":"function(d){emit(d._id, null)}"}}}"#, 1, &ZERO_META)
        .unwrap();
    drop(writer);
    write_partition(dir, "0.store.1", "active", &[("x", "{}")]);
    // Default-extension files are ignored.
    write_partition(dir, "1.couch.1", "active", &[("y", "{}")]);

    let config = IndexerConfig::new(dir, DDOC_ID).extension("store").master_base("meta");
    let mut sink = CollectingSink::new();
    mapple::index(config, &mut sink).unwrap();

    assert_eq!(sink.pairs(), vec![pair("\"x\"", "null")]);
}

#[test]
fn test_missing_design_document() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    by_id_and_a(dir);
    write_partition(dir, "0.couch.1", "active", &[("doc1", "{}")]);

    let err = mapple::index(IndexerConfig::new(dir, "_design/other"), &mut CollectingSink::new()).unwrap_err();

    assert!(matches!(err, MappleError::DesignDocumentNotFound(ref id) if id == "_design/other"));
    assert_eq!(err.exit_code(), -5);
}

#[test]
fn test_bad_map_source_fails_initialization() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_master(dir, r#"{"views":{"v":{"map":"function(doc){ emit(doc._id "}}}"#);
    write_partition(dir, "0.couch.1", "active", &[("doc1", "{}")]);

    let mut sink = CollectingSink::new();
    let err = mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap_err();

    assert!(matches!(err, MappleError::EvaluatorInitFailed(_)));
    assert_eq!(err.exit_code(), -3);
    assert!(sink.rows.is_empty());
}

#[test]
fn test_runtime_error_aborts_after_earlier_documents() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_master(dir, r#"{"views":{"v":{"map":"function(doc){ emit(doc.a.b, 1); }"}}}"#);
    write_partition(
        dir,
        "0.couch.1",
        "active",
        &[("ok", r#"{"a":{"b":"x"}}"#), ("broken", "{}"), ("never", r#"{"a":{"b":"y"}}"#)],
    );

    let mut sink = CollectingSink::new();
    let err = mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap_err();

    match &err {
        MappleError::Evaluation { doc_id, .. } => assert_eq!(doc_id, "broken"),
        other => panic!("Expected evaluation error, got {:?}", other),
    }
    assert_eq!(err.exit_code(), -3);
    assert_eq!(sink.pairs(), vec![pair("\"x\"", "1")]);
}

#[test]
fn test_reduce_policy_does_not_change_emitted_pairs() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_master(
        dir,
        r#"{"views":{"count":{"map":"function(doc){emit(doc._id, 1)}","reduce":"_count"}}}"#,
    );
    write_partition(dir, "0.couch.1", "active", &[("doc1", "{}")]);

    for policy in [ReduceSourcePolicy::Reduce, ReduceSourcePolicy::MirrorMap] {
        let config = IndexerConfig::new(dir, DDOC_ID).reduce_policy(policy);
        let mut sink = CollectingSink::new();
        mapple::index(config, &mut sink).unwrap();
        assert_eq!(sink.pairs(), vec![pair("\"doc1\"", "1")]);
    }
}

#[test]
fn test_map_function_with_loop_emits_per_element() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_master(
        dir,
        r#"{"views":{"by_tag":{"map":"function(doc){ for (var i = 0; i < doc.tags.length; i++) { emit(doc.tags[i], doc._id); } }"}}}"#,
    );
    write_partition(dir, "0.couch.1", "active", &[("doc1", r#"{"tags":["x","y"]}"#)]);

    let mut sink = CollectingSink::new();
    let summary = mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap();

    assert_eq!(summary.emitted, 2);
    assert_eq!(sink.pairs(), vec![pair("\"x\"", "\"doc1\""), pair("\"y\"", "\"doc1\"")]);
}

#[test]
fn test_nested_function_fails_before_any_output() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_master(
        dir,
        r#"{"views":{"v":{"map":"function(doc){ doc.tags.forEach(function(t){ emit(t, null); }); }"}}}"#,
    );
    write_partition(dir, "0.couch.1", "active", &[("doc1", r#"{"tags":["x"]}"#)]);

    let mut sink = CollectingSink::new();
    let err = mapple::index(IndexerConfig::new(dir, DDOC_ID), &mut sink).unwrap_err();

    assert!(matches!(err, MappleError::EvaluatorInitFailed(_)));
    assert!(sink.rows.is_empty());
}
