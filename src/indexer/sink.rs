use crate::core::MapResult;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Receives every key/value pair a run emits.
pub trait ResultSink {
    fn emit(&mut self, partition: &Path, doc_id: &str, view: &str, result: &MapResult) -> io::Result<()>;
}

/// Writes one diagnostic line per pair:
///
/// ```text
/// Emitted item: `"doc1"', `1'
/// ```
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for WriterSink<W> {
    fn emit(&mut self, _partition: &Path, _doc_id: &str, _view: &str, result: &MapResult) -> io::Result<()> {
        writeln!(
            self.writer,
            "Emitted item: `{}', `{}'",
            result.key_str(),
            result.value_str()
        )
    }
}

/// Discards every pair.
#[derive(Debug, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn emit(&mut self, _partition: &Path, _doc_id: &str, _view: &str, _result: &MapResult) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedRow {
    pub partition: PathBuf,
    pub doc_id: String,
    pub view: String,
    pub key: String,
    pub value: String,
}

/// Keeps every pair in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub rows: Vec<EmittedRow>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(key, value)` of every row, for quick assertions.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.rows.iter().map(|row| (row.key.clone(), row.value.clone())).collect()
    }
}

impl ResultSink for CollectingSink {
    fn emit(&mut self, partition: &Path, doc_id: &str, view: &str, result: &MapResult) -> io::Result<()> {
        self.rows.push(EmittedRow {
            partition: partition.to_path_buf(),
            doc_id: doc_id.to_string(),
            view: view.to_string(),
            key: result.key_str().into_owned(),
            value: result.value_str().into_owned(),
        });
        Ok(())
    }
}
