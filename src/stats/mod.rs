//! Index statistics needed by the BM25 scorer and typo tolerance: total
//! document count, per-field length sums (for average field length), and
//! per-term document frequency.
//!
//! Grounded on the deleted `index/text_fts.rs`'s `flush_doc_lengths_if_needed`
//! incremental-then-merge pattern: stats are accumulated in memory and
//! flushed as deltas, then periodically reconciled against a ground-truth
//! count to catch drift from crashes or races, the way that module's
//! `rebuild_document_count`-style verification did.

use crate::error::Result;
use crate::kv::keys;
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FieldStats {
    pub sum_field_lengths: u64,
    pub document_count: u64,
}

impl FieldStats {
    pub fn average_length(&self) -> f32 {
        if self.document_count == 0 {
            0.0
        } else {
            self.sum_field_lengths as f32 / self.document_count as f32
        }
    }
}

/// Per-index statistics store. Total document count lives in an atomic for
/// fast reads on the scoring hot path; field and term stats go through the
/// kv store since they're read far less often per-query than the doc total.
pub struct IndexStats {
    kv: Arc<dyn KvStore>,
    total_documents: AtomicI64,
}

impl IndexStats {
    pub fn load(kv: Arc<dyn KvStore>, index: &str) -> Result<Self> {
        let total = match kv.get(&keys::stats_key(index, "total_documents"))? {
            Some(bytes) => bincode::deserialize::<i64>(&bytes)?,
            None => 0,
        };
        Ok(Self { kv, total_documents: AtomicI64::new(total) })
    }

    pub fn total_documents(&self) -> i64 {
        self.total_documents.load(Ordering::Acquire)
    }

    pub fn record_document_added(&self, index: &str) -> Result<()> {
        let total = self.total_documents.fetch_add(1, Ordering::AcqRel) + 1;
        self.persist_total(index, total)
    }

    pub fn record_document_removed(&self, index: &str) -> Result<()> {
        let total = self.total_documents.fetch_sub(1, Ordering::AcqRel) - 1;
        self.persist_total(index, total)
    }

    fn persist_total(&self, index: &str, total: i64) -> Result<()> {
        let bytes = bincode::serialize(&total)?;
        self.kv.put(&keys::stats_key(index, "total_documents"), bytes)
    }

    pub fn field_stats(&self, index: &str, field: &str) -> Result<FieldStats> {
        let key = keys::stats_key(index, &format!("field:{field}"));
        match self.kv.get(&key)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(FieldStats::default()),
        }
    }

    pub fn record_field_length(&self, index: &str, field: &str, length_delta: i64) -> Result<()> {
        let key = keys::stats_key(index, &format!("field:{field}"));
        let mut stats = self.field_stats(index, field)?;
        if length_delta >= 0 {
            stats.sum_field_lengths += length_delta as u64;
            stats.document_count += 1;
        } else {
            stats.sum_field_lengths = stats.sum_field_lengths.saturating_sub((-length_delta) as u64);
            stats.document_count = stats.document_count.saturating_sub(1);
        }
        let bytes = bincode::serialize(&stats)?;
        self.kv.put(&key, bytes)
    }

    pub fn document_frequency(&self, index: &str, field: &str, term: &str) -> Result<u64> {
        let key = keys::stats_key(index, &format!("df:{field}:{term}"));
        match self.kv.get(&key)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(0),
        }
    }

    pub fn set_document_frequency(&self, index: &str, field: &str, term: &str, df: u64) -> Result<()> {
        let key = keys::stats_key(index, &format!("df:{field}:{term}"));
        let bytes = bincode::serialize(&df)?;
        self.kv.put(&key, bytes)
    }

    pub fn adjust_document_frequency(&self, index: &str, field: &str, term: &str, delta: i64) -> Result<()> {
        let current = self.document_frequency(index, field, term)? as i64;
        let updated = (current + delta).max(0) as u64;
        self.set_document_frequency(index, field, term, updated)
    }

    /// Recompute `total_documents` from the authoritative document-scan
    /// prefix, correcting any drift the atomic counter accumulated from a
    /// crash between an increment and its flush. Intended to run on a
    /// background schedule.
    pub fn rebuild_document_count(&self, index: &str) -> Result<i64> {
        let count = self.kv.scan_prefix(&keys::doc_scan_prefix(index))?.len() as i64;
        self.total_documents.store(count, Ordering::Release);
        self.persist_total(index, count)?;
        Ok(count)
    }

    /// Snapshot of all field averages in an index, used by the BM25 scorer
    /// to avoid a kv round trip per scored document.
    pub fn field_averages(&self, index: &str, fields: &[String]) -> Result<HashMap<String, f32>> {
        let mut out = HashMap::with_capacity(fields.len());
        for field in fields {
            out.insert(field.clone(), self.field_stats(index, field)?.average_length());
        }
        Ok(out)
    }

    /// Record the number of tokens `doc_id` produced for `field`, so BM25
    /// can apply true per-document length normalization rather than
    /// approximating with the field's average length.
    pub fn set_doc_field_length(&self, index: &str, field: &str, doc_id: u64, length: u32) -> Result<()> {
        let key = keys::stats_key(index, &format!("doclen:{field}:{doc_id}"));
        let bytes = bincode::serialize(&length)?;
        self.kv.put(&key, bytes)
    }

    pub fn clear_doc_field_length(&self, index: &str, field: &str, doc_id: u64) -> Result<()> {
        let key = keys::stats_key(index, &format!("doclen:{field}:{doc_id}"));
        self.kv.delete(&key)
    }

    /// `None` means no length was ever recorded for this document/field
    /// pair; callers fall back to the field's average length in that case.
    pub fn doc_field_length(&self, index: &str, field: &str, doc_id: u64) -> Result<Option<u32>> {
        let key = keys::stats_key(index, &format!("doclen:{field}:{doc_id}"));
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}
