//! Term dictionary: an LRU cache of posting lists over the key-value store.
//!
//! Each merge writes one new shard under the term's key rather than reading
//! the whole posting list, mutating it, and writing it back. That keeps the
//! atomic-merge invariant: a crash or read failure mid-merge can only ever
//! lose the shard being written, never a previously-persisted one.

use crate::codec;
use crate::error::Result;
use crate::kv::keys;
use crate::kv::KvStore;
use crate::postings::PostingList;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Approximate resident set size, in kilobytes, sampled via `libc::getrusage`.
/// Used as a coarse memory-pressure signal for extra cache eviction between
/// normal LRU evictions.
fn sample_rss_kb() -> u64 {
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            // ru_maxrss is kilobytes on Linux, bytes on macOS; this crate
            // targets Linux deployment so we treat it as kilobytes.
            usage.ru_maxrss as u64
        } else {
            0
        }
    }
}

struct TermDictionaryInner {
    kv: Arc<dyn KvStore>,
    cache: RwLock<LruCache<String, Arc<PostingList>>>,
    shard_counters: RwLock<HashMap<String, u32>>,
    /// Recently-seen terms per index, bounded to `2 * max_cache_size`, used
    /// by typo tolerance as a candidate pool without scanning the whole
    /// term key-space.
    term_catalogue: RwLock<HashMap<String, LruCache<String, ()>>>,
    max_record_size: usize,
    compression_threshold: usize,
    memory_check_interval: usize,
    memory_pressure_threshold_kb: u64,
    put_count: AtomicUsize,
    /// Posting lists longer than this are capped by evicting their oldest
    /// 10% of entries.
    max_posting_list_size: usize,
}

/// Write-through, LRU-cached dictionary of posting lists, namespaced per
/// index.
#[derive(Clone)]
pub struct TermDictionary {
    inner: Arc<TermDictionaryInner>,
}

impl TermDictionary {
    pub fn new(
        kv: Arc<dyn KvStore>,
        max_cache_size: usize,
        max_record_size: usize,
        compression_threshold: usize,
        memory_check_interval: usize,
    ) -> Self {
        Self::with_posting_list_cap(kv, max_cache_size, max_record_size, compression_threshold, memory_check_interval, 5000)
    }

    /// Like `new`, but with an explicit posting-list size cap instead of the
    /// default of 5 000.
    pub fn with_posting_list_cap(
        kv: Arc<dyn KvStore>,
        max_cache_size: usize,
        max_record_size: usize,
        compression_threshold: usize,
        memory_check_interval: usize,
        max_posting_list_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(TermDictionaryInner {
                kv,
                cache: RwLock::new(LruCache::new(NonZeroUsize::new(max_cache_size.max(1)).unwrap())),
                shard_counters: RwLock::new(HashMap::new()),
                term_catalogue: RwLock::new(HashMap::new()),
                max_record_size,
                compression_threshold,
                memory_check_interval,
                memory_pressure_threshold_kb: 512 * 1024, // 512 MB default high-water mark
                put_count: AtomicUsize::new(0),
                max_posting_list_size,
            }),
        }
    }

    fn shard_key(term_key: &str, shard_idx: u32) -> String {
        format!("{term_key}#{shard_idx}")
    }

    /// Fetch the fully-merged posting list for a term, checking the cache
    /// first (double-checked locking: cheap read-lock peek, then a write
    /// lock only on miss).
    pub fn get(&self, index: &str, field: &str, term: &str) -> Result<Option<Arc<PostingList>>> {
        let term_key = keys::term_key(index, field, term);

        {
            let cache = self.inner.cache.read();
            if let Some(list) = cache.peek(&term_key) {
                return Ok(Some(list.clone()));
            }
        }

        let merged = self.load_and_merge_shards(&term_key)?;
        match merged {
            Some(list) => {
                let list = Arc::new(list);
                self.inner.cache.write().put(term_key, list.clone());
                Ok(Some(list))
            }
            None => Ok(None),
        }
    }

    fn load_and_merge_shards(&self, term_key: &str) -> Result<Option<PostingList>> {
        let prefix = format!("{term_key}#");
        let shards = self.inner.kv.scan_prefix(&prefix)?;
        if shards.is_empty() {
            return Ok(None);
        }

        let mut merged = PostingList::new();
        for (_, bytes) in shards {
            let shard = codec::decode_posting_list(&bytes, self.inner.max_record_size)?;
            merged.merge(&shard);
        }
        Ok(Some(merged))
    }

    /// Merge `delta` into the term's posting list by appending a new shard;
    /// never reads the existing shards back in to rewrite them. The cache
    /// entry is then refreshed from the full set of shards (including the
    /// one just written) so the merged list stays available for the next
    /// `get` without a reload.
    pub fn merge(&self, index: &str, field: &str, term: &str, delta: &PostingList) -> Result<()> {
        let term_key = keys::term_key(index, field, term);

        let shard_idx = {
            let mut counters = self.inner.shard_counters.write();
            let next = counters.entry(term_key.clone()).or_insert_with(|| {
                self.inner
                    .kv
                    .scan_prefix(&format!("{term_key}#"))
                    .map(|v| v.len() as u32)
                    .unwrap_or(0)
            });
            let idx = *next;
            *next += 1;
            idx
        };

        let bytes = codec::encode_posting_list(
            delta,
            self.inner.compression_threshold,
            self.inner.max_record_size,
        )?;
        self.inner.kv.put(&Self::shard_key(&term_key, shard_idx), bytes)?;

        self.refresh_cache_and_enforce_cap(&term_key)?;
        self.note_term(index, field, term);
        self.maybe_check_memory_pressure();

        Ok(())
    }

    /// Reloads the term's full posting list from its shards and puts it back
    /// into the cache, touching LRU recency, rather than leaving the term
    /// absent from the cache until the next `get`. If the reloaded list now
    /// exceeds `max_posting_list_size`, evicts the oldest 10% of entries and
    /// compacts back to a single shard before caching it.
    fn refresh_cache_and_enforce_cap(&self, term_key: &str) -> Result<()> {
        let Some(mut merged) = self.load_and_merge_shards(term_key)? else {
            return Ok(());
        };

        if merged.doc_count() > self.inner.max_posting_list_size {
            merged.evict_oldest_if_over(self.inner.max_posting_list_size);
            self.compact_shards(term_key, &merged)?;
        }

        self.inner.cache.write().put(term_key.to_string(), Arc::new(merged));
        Ok(())
    }

    fn note_term(&self, index: &str, field: &str, term: &str) {
        let mut catalogues = self.inner.term_catalogue.write();
        let cap = NonZeroUsize::new((self.inner.cache.read().cap().get() * 2).max(1)).unwrap();
        let catalogue = catalogues
            .entry(index.to_string())
            .or_insert_with(|| LruCache::new(cap));
        catalogue.put(format!("{field}:{term}"), ());
    }

    /// Candidate terms seen recently for `index`, used by typo tolerance.
    /// Not exhaustive: only covers terms that have passed through this
    /// dictionary instance's cache since startup.
    pub fn catalogue_terms(&self, index: &str) -> Vec<(String, String)> {
        let catalogues = self.inner.term_catalogue.read();
        match catalogues.get(index) {
            Some(cache) => cache
                .iter()
                .filter_map(|(key, _)| key.split_once(':').map(|(f, t)| (f.to_string(), t.to_string())))
                .collect(),
            None => Vec::new(),
        }
    }

    fn maybe_check_memory_pressure(&self) {
        let count = self.inner.put_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.inner.memory_check_interval.max(1) != 0 {
            return;
        }

        let rss_kb = sample_rss_kb();
        if rss_kb > self.inner.memory_pressure_threshold_kb {
            let mut cache = self.inner.cache.write();
            let shrink_to = cache.len() / 2;
            while cache.len() > shrink_to {
                if cache.pop_lru().is_none() {
                    break;
                }
            }
        }
    }

    /// Remove a document's contribution for a term entirely, used when a
    /// document is deleted. Appends a tombstone-merge shard the same way
    /// `merge` does, so the same never-overwrite invariant holds.
    pub fn remove_doc(&self, index: &str, field: &str, term: &str, doc_id: crate::postings::DocId) -> Result<()> {
        let term_key = keys::term_key(index, field, term);
        if let Some(mut merged) = self.load_and_merge_shards(&term_key)? {
            merged.remove_entry(doc_id);
            self.compact_shards(&term_key, &merged)?;
            self.inner.cache.write().pop(&term_key);
        }
        Ok(())
    }

    /// Collapse all shards for a term into a single shard. Used after
    /// deletions, where leaving stale shards around would mean a doc
    /// reappearing via merge despite being removed.
    fn compact_shards(&self, term_key: &str, merged: &PostingList) -> Result<()> {
        let prefix = format!("{term_key}#");
        let existing = self.inner.kv.scan_prefix(&prefix)?;
        for (key, _) in &existing {
            self.inner.kv.delete(key)?;
        }

        let bytes = codec::encode_posting_list(
            merged,
            self.inner.compression_threshold,
            self.inner.max_record_size,
        )?;
        self.inner.kv.put(&Self::shard_key(term_key, 0), bytes)?;
        self.inner.shard_counters.write().insert(term_key.to_string(), 1);
        Ok(())
    }

    /// All terms known for `field` in `index`, derived from the shard
    /// key-space rather than the (bounded, best-effort) catalogue, so
    /// wildcard queries see every persisted term and not just recently
    /// touched ones.
    pub fn scan_terms(&self, index: &str, field: &str) -> Result<Vec<String>> {
        let prefix = keys::term_scan_prefix(index, field);
        let mut terms = Vec::new();
        let mut last: Option<String> = None;
        for (key, _) in self.inner.kv.scan_prefix(&prefix)? {
            // key is `term:<index>:<field>:<term>#<shard_idx>`; strip both.
            let without_shard = key.rsplit_once('#').map(|(k, _)| k).unwrap_or(&key);
            let term = &without_shard[prefix.len()..];
            if last.as_deref() != Some(term) {
                terms.push(term.to_string());
                last = Some(term.to_string());
            }
        }
        Ok(terms)
    }

    /// Drop every in-memory trace of `index`: cached posting lists, shard
    /// counters, and the term catalogue. The caller is responsible for
    /// deleting the underlying kv keys; this only clears what this
    /// dictionary instance is holding onto. Idempotent.
    pub fn clear_index(&self, index: &str) {
        let prefix = format!("term:{index}:");

        let mut cache = self.inner.cache.write();
        let stale: Vec<String> = cache.iter().map(|(k, _)| k.clone()).filter(|k| k.starts_with(&prefix)).collect();
        for key in stale {
            cache.pop(&key);
        }
        drop(cache);

        self.inner.shard_counters.write().retain(|k, _| !k.starts_with(&prefix));
        self.inner.term_catalogue.write().remove(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::EmbeddedKv;
    use tempfile::TempDir;

    fn test_dict() -> (TempDir, TermDictionary) {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(EmbeddedKv::open(dir.path()).unwrap());
        let dict = TermDictionary::new(kv, 8, 10_000_000, 1_000_000, 4);
        (dir, dict)
    }

    #[test]
    fn test_merge_then_get() {
        let (_dir, dict) = test_dict();
        let mut delta = PostingList::new();
        delta.add(1, 1, None);
        dict.merge("books", "title", "rust", &delta).unwrap();

        let list = dict.get("books", "title", "rust").unwrap().unwrap();
        assert_eq!(list.doc_count(), 1);
    }

    #[test]
    fn test_merge_leaves_term_in_cache() {
        let (_dir, dict) = test_dict();
        let mut delta = PostingList::new();
        delta.add(1, 1, None);
        dict.merge("books", "title", "rust", &delta).unwrap();

        let term_key = keys::term_key("books", "title", "rust");
        assert!(dict.inner.cache.read().peek(&term_key).is_some());
    }

    #[test]
    fn test_two_merges_accumulate_across_shards() {
        let (_dir, dict) = test_dict();
        let mut d1 = PostingList::new();
        d1.add(1, 1, None);
        dict.merge("books", "title", "rust", &d1).unwrap();

        let mut d2 = PostingList::new();
        d2.add(2, 1, None);
        dict.merge("books", "title", "rust", &d2).unwrap();

        let list = dict.get("books", "title", "rust").unwrap().unwrap();
        assert_eq!(list.doc_count(), 2);
    }

    #[test]
    fn test_remove_doc_compacts_shards() {
        let (_dir, dict) = test_dict();
        let mut d1 = PostingList::new();
        d1.add(1, 1, None);
        dict.merge("books", "title", "rust", &d1).unwrap();

        let mut d2 = PostingList::new();
        d2.add(2, 1, None);
        dict.merge("books", "title", "rust", &d2).unwrap();

        dict.remove_doc("books", "title", "rust", 1).unwrap();

        let list = dict.get("books", "title", "rust").unwrap().unwrap();
        assert_eq!(list.doc_count(), 1);
        assert!(!list.contains(1));
        assert!(list.contains(2));
    }

    #[test]
    fn test_missing_term_returns_none() {
        let (_dir, dict) = test_dict();
        assert!(dict.get("books", "title", "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_catalogue_tracks_recent_terms() {
        let (_dir, dict) = test_dict();
        let mut d = PostingList::new();
        d.add(1, 1, None);
        dict.merge("books", "title", "rust", &d).unwrap();

        let terms = dict.catalogue_terms("books");
        assert!(terms.contains(&("title".to_string(), "rust".to_string())));
    }

    #[test]
    fn test_scan_terms_lists_all_persisted_terms() {
        let (_dir, dict) = test_dict();
        for term in ["rank", "ranking", "ranker"] {
            let mut d = PostingList::new();
            d.add(1, 1, None);
            dict.merge("books", "title", term, &d).unwrap();
        }

        let mut terms = dict.scan_terms("books", "title").unwrap();
        terms.sort();
        assert_eq!(terms, vec!["rank".to_string(), "ranker".to_string(), "ranking".to_string()]);
    }

    #[test]
    fn test_clear_index_drops_cache_and_catalogue() {
        let (_dir, dict) = test_dict();
        let mut d = PostingList::new();
        d.add(1, 1, None);
        dict.merge("books", "title", "rust", &d).unwrap();
        assert!(dict.get("books", "title", "rust").unwrap().is_some());

        dict.clear_index("books");

        assert!(dict.catalogue_terms("books").is_empty());
        // Underlying shards are untouched (index_service deletes those);
        // a fresh get still finds them and repopulates the cache.
        assert!(dict.get("books", "title", "rust").unwrap().is_some());
    }

    #[test]
    fn test_posting_list_cap_evicts_oldest_entries() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(EmbeddedKv::open(dir.path()).unwrap());
        let dict = TermDictionary::with_posting_list_cap(kv, 8, 10_000_000, 1_000_000, 1000, 10);

        for doc_id in 0..20u64 {
            let mut delta = PostingList::new();
            delta.add(doc_id, 1, None);
            dict.merge("books", "title", "popular", &delta).unwrap();
        }

        let list = dict.get("books", "title", "popular").unwrap().unwrap();
        assert!(list.doc_count() <= 10, "expected capped list, got {}", list.doc_count());
        assert!(!list.contains(0), "oldest doc id should have been evicted");
        assert!(list.contains(19), "most recent doc id should survive eviction");
    }
}
