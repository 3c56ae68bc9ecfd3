//! Ordered key-value store adapter.
//!
//! A single ordered append-only log plus an in-memory index reconstructed by
//! replaying the log on open: this crate's scope never needs multi-level
//! compaction.
//!
//! Keys are canonical strings (see `keys` submodule); values are opaque
//! byte blobs produced by the codec layer. Every write is appended to the
//! log with a CRC32C-checked, length-prefixed frame before the in-memory
//! index is updated, so recovery on reopen simply replays the log.

pub mod keys;

use crate::error::{Result, SearchError};
use crate::storage::checksum::{Checksum, ChecksumType};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single mutation against the store.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// Ordered key-value store trait. An index, a term dictionary chunk, a
/// document, and index metadata are all just values under canonical keys.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    /// Lexicographic scan of all keys with the given prefix.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
    /// Apply several mutations as one appended batch. Not atomic across a
    /// crash mid-write (a torn batch is truncated on replay), but applied
    /// to the in-memory index all at once so readers never see a partial
    /// batch.
    fn batch(&self, ops: Vec<WriteOp>) -> Result<()>;
}

/// Record tag distinguishing puts from deletes in the log.
const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// A durable, single-file ordered key-value store: an in-memory `BTreeMap`
/// index backed by an append-only log of checksummed, length-prefixed
/// records. Opening replays the log to rebuild the index; a corrupt trailing
/// record (partial write from a crash) is dropped rather than rejected.
pub struct EmbeddedKv {
    log_path: PathBuf,
    log: Arc<RwLock<File>>,
    index: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl EmbeddedKv {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let log_path = dir.join("store.log");

        let index = Arc::new(RwLock::new(BTreeMap::new()));
        if log_path.exists() {
            Self::replay(&log_path, &index)?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            log_path,
            log: Arc::new(RwLock::new(log)),
            index,
        })
    }

    fn replay(log_path: &Path, index: &RwLock<BTreeMap<String, Vec<u8>>>) -> Result<()> {
        let file = File::open(log_path)?;
        let mut reader = BufReader::new(file);
        let mut idx = index.write();

        loop {
            let mut tag_buf = [0u8; 1];
            match reader.read_exact(&mut tag_buf) {
                Ok(()) => {}
                Err(_) => break, // EOF or torn record: stop replay here
            };
            let tag = tag_buf[0];

            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).is_err() {
                break;
            }
            let frame_len = u32::from_le_bytes(len_buf) as usize;

            let mut frame = vec![0u8; frame_len];
            if reader.read_exact(&mut frame).is_err() {
                break;
            }

            let mut checksum_buf = [0u8; 4];
            if reader.read_exact(&mut checksum_buf).is_err() {
                break;
            }
            let expected = u32::from_le_bytes(checksum_buf);
            if Checksum::verify(ChecksumType::CRC32C, &frame, expected).is_err() {
                break; // corrupt trailing record, stop replay here
            }

            match tag {
                TAG_PUT => {
                    if frame.len() < 4 {
                        break;
                    }
                    let key_len = u32::from_le_bytes(frame[0..4].try_into().unwrap()) as usize;
                    if frame.len() < 4 + key_len {
                        break;
                    }
                    let key = String::from_utf8_lossy(&frame[4..4 + key_len]).to_string();
                    let value = frame[4 + key_len..].to_vec();
                    idx.insert(key, value);
                }
                TAG_DELETE => {
                    let key = String::from_utf8_lossy(&frame).to_string();
                    idx.remove(&key);
                }
                _ => break,
            }
        }

        Ok(())
    }

    fn append_record(file: &mut File, tag: u8, frame: &[u8]) -> Result<()> {
        let checksum = Checksum::compute(ChecksumType::CRC32C, frame);
        file.write_all(&[tag])?;
        file.write_all(&(frame.len() as u32).to_le_bytes())?;
        file.write_all(frame)?;
        file.write_all(&checksum.to_le_bytes())?;
        Ok(())
    }

    fn put_frame(key: &str, value: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(4 + key.len() + value.len());
        frame.extend_from_slice(&(key.len() as u32).to_le_bytes());
        frame.extend_from_slice(key.as_bytes());
        frame.extend_from_slice(value);
        frame
    }

    /// Path to the log file, exposed so the cli/engine can report storage
    /// location without leaking the internal struct layout.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl KvStore for EmbeddedKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.index.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let frame = Self::put_frame(key, &value);
        {
            let mut file = self.log.write();
            Self::append_record(&mut file, TAG_PUT, &frame)
                .map_err(|e| SearchError::StorageUnavailable(e.to_string()))?;
            file.sync_data().map_err(SearchError::Io)?;
        }
        self.index.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        {
            let mut file = self.log.write();
            Self::append_record(&mut file, TAG_DELETE, key.as_bytes())?;
            file.sync_data().map_err(SearchError::Io)?;
        }
        self.index.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let index = self.index.read();
        Ok(index
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        {
            let mut file = self.log.write();
            for op in &ops {
                match op {
                    WriteOp::Put(key, value) => {
                        let frame = Self::put_frame(key, value);
                        Self::append_record(&mut file, TAG_PUT, &frame)?;
                    }
                    WriteOp::Delete(key) => {
                        Self::append_record(&mut file, TAG_DELETE, key.as_bytes())?;
                    }
                }
            }
            file.sync_data().map_err(SearchError::Io)?;
        }

        let mut index = self.index.write();
        for op in ops {
            match op {
                WriteOp::Put(key, value) => {
                    index.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    index.remove(&key);
                }
            }
        }
        Ok(())
    }
}
