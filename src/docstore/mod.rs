//! Document storage: the source-of-truth JSON blob per `(index, doc_id)`.
//!
//! A row-store put/get/delete surface using the same checksum framing
//! discipline as the rest of the crate (via the `codec` module). Bulk
//! operations isolate per-document failures rather than aborting the whole
//! batch, collecting a result per item instead.

use crate::codec;
use crate::error::{Result, SearchError};
use crate::kv::keys;
use crate::kv::KvStore;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Outcome of a bulk upsert: how many documents succeeded, and the ids (with
/// error messages) of the ones that didn't.
#[derive(Debug, Clone, Default)]
pub struct BulkResult {
    pub success_count: usize,
    pub failures: Vec<(String, String)>,
}

pub struct DocStore {
    kv: Arc<dyn KvStore>,
    max_record_size: usize,
    compression_threshold: usize,
}

impl DocStore {
    pub fn new(kv: Arc<dyn KvStore>, max_record_size: usize, compression_threshold: usize) -> Self {
        Self { kv, max_record_size, compression_threshold }
    }

    /// Encodes and stores `doc`. If it exceeds `max_record_size`, a minimal
    /// sentinel record is written at its key in place of the real content
    /// (overwriting whatever was there before) and `DocumentTooLarge` is
    /// still returned: the write boundary rejects the document, but the
    /// attempt leaves a trace instead of silently discarding it.
    pub fn put(&self, index: &str, doc_id: &str, doc: &JsonValue) -> Result<()> {
        let json_bytes = serde_json::to_vec(doc).map_err(|e| SearchError::Serialization(e.to_string()))?;
        match codec::encode_document(&json_bytes, self.compression_threshold, self.max_record_size) {
            Ok(encoded) => self.kv.put(&keys::doc_key(index, doc_id), encoded),
            Err(err @ SearchError::DocumentTooLarge(_)) => {
                let sentinel = codec::encode_sentinel_document(&err.to_string(), self.max_record_size)?;
                self.kv.put(&keys::doc_key(index, doc_id), sentinel)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// A sentinel record left behind by a rejected oversized write reads back
    /// as absent: the real document was never stored.
    pub fn get(&self, index: &str, doc_id: &str) -> Result<Option<JsonValue>> {
        match self.kv.get(&keys::doc_key(index, doc_id))? {
            Some(bytes) if codec::is_sentinel_document(&bytes) => Ok(None),
            Some(bytes) => {
                let json_bytes = codec::decode_document(&bytes, self.max_record_size)?;
                let doc = serde_json::from_slice(&json_bytes).map_err(|e| SearchError::Serialization(e.to_string()))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    pub fn delete(&self, index: &str, doc_id: &str) -> Result<()> {
        self.kv.delete(&keys::doc_key(index, doc_id))
    }

    pub fn exists(&self, index: &str, doc_id: &str) -> Result<bool> {
        match self.kv.get(&keys::doc_key(index, doc_id))? {
            Some(bytes) => Ok(!codec::is_sentinel_document(&bytes)),
            None => Ok(false),
        }
    }

    /// Upsert many documents, isolating failures: a bad document (too large,
    /// unserializable) doesn't prevent the rest of the batch from landing.
    pub fn bulk_put(&self, index: &str, docs: &[(String, JsonValue)]) -> BulkResult {
        let mut result = BulkResult::default();
        for (doc_id, doc) in docs {
            match self.put(index, doc_id, doc) {
                Ok(()) => result.success_count += 1,
                Err(e) => result.failures.push((doc_id.clone(), e.to_string())),
            }
        }
        result
    }

    pub fn bulk_delete(&self, index: &str, doc_ids: &[String]) -> BulkResult {
        let mut result = BulkResult::default();
        for doc_id in doc_ids {
            match self.delete(index, doc_id) {
                Ok(()) => result.success_count += 1,
                Err(e) => result.failures.push((doc_id.clone(), e.to_string())),
            }
        }
        result
    }

    /// Scan all documents in an index, optionally filtered, with limit/offset
    /// pagination over the scan order (lexicographic by doc id).
    pub fn scan(
        &self,
        index: &str,
        filter: impl Fn(&JsonValue) -> bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, JsonValue)>> {
        let prefix = keys::doc_scan_prefix(index);
        let entries = self.kv.scan_prefix(&prefix)?;

        let mut matched = Vec::new();
        for (key, bytes) in entries {
            if codec::is_sentinel_document(&bytes) {
                continue;
            }
            let json_bytes = codec::decode_document(&bytes, self.max_record_size)?;
            let doc: JsonValue = serde_json::from_slice(&json_bytes).map_err(|e| SearchError::Serialization(e.to_string()))?;
            if filter(&doc) {
                let doc_id = key[prefix.len()..].to_string();
                matched.push((doc_id, doc));
            }
        }

        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// Counts stored documents, excluding sentinel records left by rejected
    /// oversized writes.
    pub fn count(&self, index: &str) -> Result<usize> {
        Ok(self
            .kv
            .scan_prefix(&keys::doc_scan_prefix(index))?
            .into_iter()
            .filter(|(_, bytes)| !codec::is_sentinel_document(bytes))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::EmbeddedKv;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, DocStore) {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(EmbeddedKv::open(dir.path()).unwrap());
        (dir, DocStore::new(kv, 10_000_000, 1_000_000))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = test_store();
        let doc = json!({"title": "Rust in Action"});
        store.put("books", "1", &doc).unwrap();
        assert_eq!(store.get("books", "1").unwrap(), Some(doc));
    }

    #[test]
    fn test_delete_removes_document() {
        let (_dir, store) = test_store();
        store.put("books", "1", &json!({"title": "x"})).unwrap();
        store.delete("books", "1").unwrap();
        assert_eq!(store.get("books", "1").unwrap(), None);
    }

    #[test]
    fn test_oversized_put_leaves_sentinel_and_rejects() {
        let (_dir, store) = test_store();
        let oversized = json!({"title": "x".repeat(20_000_000)});

        let result = store.put("books", "1", &oversized);
        assert!(matches!(result, Err(SearchError::DocumentTooLarge(_))));

        assert_eq!(store.get("books", "1").unwrap(), None);
        assert!(!store.exists("books", "1").unwrap());
        assert_eq!(store.count("books").unwrap(), 0);
        assert!(store.scan("books", |_| true, 0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_bulk_put_isolates_failures() {
        let (_dir, store) = test_store();
        let oversized = "x".repeat(20_000_000);
        let docs = vec![
            ("1".to_string(), json!({"title": "ok"})),
            ("2".to_string(), json!({"title": oversized})),
        ];
        let result = store.bulk_put("books", &docs);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].0, "2");
    }

    #[test]
    fn test_scan_with_filter_and_pagination() {
        let (_dir, store) = test_store();
        for i in 0..5 {
            store.put("books", &i.to_string(), &json!({"year": i})).unwrap();
        }

        let all = store.scan("books", |_| true, 0, 100).unwrap();
        assert_eq!(all.len(), 5);

        let page = store.scan("books", |_| true, 1, 2).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_count() {
        let (_dir, store) = test_store();
        store.put("books", "1", &json!({})).unwrap();
        store.put("books", "2", &json!({})).unwrap();
        assert_eq!(store.count("books").unwrap(), 2);
    }
}
