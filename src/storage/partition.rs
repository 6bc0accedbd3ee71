//! Append-only partition files.
//!
//! A partition file is a log of length-prefixed MessagePack records:
//!
//! ```text
//! [u32 LE length][rmp-serde PartitionRecord] ...
//! ```
//!
//! Each `Doc` record takes the next change sequence number. Opening a file
//! replays the whole log; the latest record per document id and per local
//! record name wins.

use super::engine::{ChangesOptions, DocInfo, Document, PartitionHandle, PartitionStore};
use super::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartitionRecord {
    Local {
        name: String,
        body: Vec<u8>,
    },
    Doc {
        id: String,
        rev_seq: u64,
        rev_meta: Vec<u8>,
        deleted: bool,
        body: Vec<u8>,
    },
}

// ============================================================================
// Reader
// ============================================================================

#[derive(Debug)]
struct StoredDoc {
    info: DocInfo,
    body: Vec<u8>,
}

/// A partition file loaded into memory.
#[derive(Debug)]
pub struct PartitionFile {
    path: PathBuf,
    locals: HashMap<String, Vec<u8>>,
    /// Latest revisions ordered by `db_seq`.
    docs: Vec<StoredDoc>,
    by_id: HashMap<String, usize>,
}

impl PartitionFile {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| StorageError::io(&path, e))?;
        let records = read_records(&path, BufReader::new(file))?;

        let mut locals = HashMap::new();
        let mut latest: HashMap<String, StoredDoc> = HashMap::new();
        let mut db_seq = 0u64;

        for record in records {
            match record {
                PartitionRecord::Local { name, body } => {
                    locals.insert(name, body);
                }
                PartitionRecord::Doc {
                    id,
                    rev_seq,
                    rev_meta,
                    deleted,
                    body,
                } => {
                    db_seq += 1;
                    let info = DocInfo {
                        id: id.clone(),
                        db_seq,
                        rev_seq,
                        rev_meta,
                        deleted,
                    };
                    latest.insert(id, StoredDoc { info, body });
                }
            }
        }

        let mut docs: Vec<StoredDoc> = latest.into_values().collect();
        docs.sort_by_key(|doc| doc.info.db_seq);
        let by_id = docs
            .iter()
            .enumerate()
            .map(|(idx, doc)| (doc.info.id.clone(), idx))
            .collect();

        debug!(path = %path.display(), docs = docs.len(), last_seq = db_seq, "opened partition");

        Ok(Self {
            path,
            locals,
            docs,
            by_id,
        })
    }

    /// Number of distinct documents, deleted ones included.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    fn lookup(&self, id: &str) -> StorageResult<&StoredDoc> {
        self.by_id
            .get(id)
            .map(|&idx| &self.docs[idx])
            .filter(|doc| !doc.info.deleted)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}

fn read_records<R: Read>(path: &Path, mut reader: R) -> StorageResult<Vec<PartitionRecord>> {
    let mut records = Vec::new();
    loop {
        let mut len_bytes = [0u8; 4];
        match read_full(&mut reader, &mut len_bytes) {
            Ok(0) => break,
            Ok(n) if n < len_bytes.len() => {
                return Err(StorageError::corrupt(path, "truncated record header"));
            }
            Ok(_) => {}
            Err(e) => return Err(StorageError::io(path, e)),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut data = Vec::new();
        reader
            .by_ref()
            .take(len as u64)
            .read_to_end(&mut data)
            .map_err(|e| StorageError::io(path, e))?;
        if data.len() < len {
            return Err(StorageError::corrupt(path, "truncated record body"));
        }
        let record: PartitionRecord = rmp_serde::from_slice(&data)
            .map_err(|e| StorageError::corrupt(path, format!("undecodable record: {}", e)))?;
        records.push(record);
    }
    Ok(records)
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl PartitionHandle for PartitionFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_local(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.locals.get(name).cloned())
    }

    fn changes_since<E>(
        &self,
        since: u64,
        options: ChangesOptions,
        visit: &mut dyn FnMut(&DocInfo) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<StorageError>,
    {
        let start = self.docs.partition_point(|doc| doc.info.db_seq <= since);
        for doc in &self.docs[start..] {
            if doc.info.deleted && !options.include_deletes {
                continue;
            }
            visit(&doc.info)?;
        }
        Ok(())
    }

    fn open_doc(&self, info: &DocInfo) -> StorageResult<Document> {
        let doc = self.lookup(&info.id)?;
        if doc.info.db_seq != info.db_seq {
            return Err(StorageError::NotFound(format!("{} at seq {}", info.id, info.db_seq)));
        }
        Ok(Document {
            id: doc.info.id.clone(),
            body: doc.body.clone(),
        })
    }

    fn open_doc_by_id(&self, id: &str) -> StorageResult<Document> {
        let doc = self.lookup(id)?;
        Ok(Document {
            id: doc.info.id.clone(),
            body: doc.body.clone(),
        })
    }
}

/// Opens partition files straight from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStore;

impl PartitionStore for FileStore {
    type Handle = PartitionFile;

    fn open_partition(&self, path: &Path) -> StorageResult<PartitionFile> {
        PartitionFile::open(path)
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Appends records to a partition file.
pub struct PartitionWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl PartitionWriter {
    /// Open `path` for appending, creating it when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, record: &PartitionRecord) -> StorageResult<()> {
        let serialized = rmp_serde::to_vec(record)?;
        let len = u32::try_from(serialized.len())
            .map_err(|_| StorageError::Encode(format!("record of {} bytes is too large", serialized.len())))?;
        self.file
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.file.write_all(&serialized))
            .map_err(|e| StorageError::io(&self.path, e))
    }

    pub fn set_local(&mut self, name: &str, body: &str) -> StorageResult<()> {
        self.append(&PartitionRecord::Local {
            name: name.to_string(),
            body: body.as_bytes().to_vec(),
        })
    }

    pub fn save_doc(&mut self, id: &str, body: &[u8], rev_seq: u64, rev_meta: &[u8]) -> StorageResult<()> {
        self.append(&PartitionRecord::Doc {
            id: id.to_string(),
            rev_seq,
            rev_meta: rev_meta.to_vec(),
            deleted: false,
            body: body.to_vec(),
        })
    }

    pub fn delete_doc(&mut self, id: &str, rev_seq: u64, rev_meta: &[u8]) -> StorageResult<()> {
        self.append(&PartitionRecord::Doc {
            id: id.to_string(),
            rev_seq,
            rev_meta: rev_meta.to_vec(),
            deleted: true,
            body: Vec::new(),
        })
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.flush().map_err(|e| StorageError::io(&self.path, e))
    }
}

impl Drop for PartitionWriter {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}
