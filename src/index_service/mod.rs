//! Index lifecycle and document ingestion.
//!
//! Index metadata (create/get/list/drop) is persisted alongside the data it
//! describes, and documents are indexed through a per-field analysis-then-merge
//! path. `IndexMeta` plays the role a table schema would, with `Mapping`
//! standing in for column definitions.

use crate::analysis::{flatten_and_tokenize, AnalyzerRegistry};
use crate::dictionary::TermDictionary;
use crate::docstore::{BulkResult, DocStore};
use crate::error::{Result, SearchError};
use crate::kv::keys;
use crate::kv::KvStore;
use crate::postings::PostingList;
use crate::stats::IndexStats;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Declares how one field should be analyzed and scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(rename = "type")]
    pub field_type: String,
    pub analyzer: String,
    pub boost: f32,
    #[serde(default)]
    pub subfields: HashMap<String, Mapping>,
}

impl Default for Mapping {
    fn default() -> Self {
        Self {
            field_type: "text".to_string(),
            analyzer: "standard".to_string(),
            boost: 1.0,
            subfields: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    pub track_positions: bool,
    pub max_posting_list_size: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { track_positions: true, max_posting_list_size: 5000 }
    }
}

/// A partial update to `IndexSettings`; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub track_positions: Option<bool>,
    pub max_posting_list_size: Option<usize>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.track_positions.is_none() && self.max_posting_list_size.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub mappings: HashMap<String, Mapping>,
    pub settings: IndexSettings,
}

/// Service wiring document storage, the term dictionary, and stats together
/// for a single key-value store shared across all indices.
pub struct IndexService {
    kv: Arc<dyn KvStore>,
    docs: DocStore,
    dictionary: TermDictionary,
    analyzers: AnalyzerRegistry,
    stats: RwLock<HashMap<String, Arc<IndexStats>>>,
    /// Per-`(index, doc_id)` write guard: two concurrent writes
    /// to the same document are serialized so the final state is whichever
    /// acquired the guard last, while writes to different documents proceed
    /// in parallel. Lazily populated; never shrinks, since a doc id may be
    /// re-indexed after deletion.
    doc_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl IndexService {
    pub fn new(kv: Arc<dyn KvStore>, docs: DocStore, dictionary: TermDictionary) -> Self {
        Self {
            kv,
            docs,
            dictionary,
            analyzers: AnalyzerRegistry::default(),
            stats: RwLock::new(HashMap::new()),
            doc_locks: DashMap::new(),
        }
    }

    fn doc_lock(&self, index: &str, doc_id: &str) -> Arc<Mutex<()>> {
        self.doc_locks
            .entry((index.to_string(), doc_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn stats_for(&self, index: &str) -> Result<Arc<IndexStats>> {
        if let Some(stats) = self.stats.read().unwrap().get(index) {
            return Ok(stats.clone());
        }
        let loaded = Arc::new(IndexStats::load(self.kv.clone(), index)?);
        self.stats.write().unwrap().insert(index.to_string(), loaded.clone());
        Ok(loaded)
    }

    pub fn create_index(&self, name: &str, mappings: HashMap<String, Mapping>, settings: IndexSettings) -> Result<IndexMeta> {
        if self.kv.get(&keys::index_key(name))?.is_some() {
            return Err(SearchError::AlreadyExists(format!("index '{name}' already exists")));
        }
        let meta = IndexMeta { name: name.to_string(), created_at: Utc::now(), mappings, settings };
        let bytes = bincode::serialize(&meta)?;
        self.kv.put(&keys::index_key(name), bytes)?;
        Ok(meta)
    }

    pub fn get_index(&self, name: &str) -> Result<IndexMeta> {
        let bytes = self
            .kv
            .get(&keys::index_key(name))?
            .ok_or_else(|| SearchError::NotFound(format!("index '{name}' not found")))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn list_indices(&self) -> Result<Vec<IndexMeta>> {
        let entries = self.kv.scan_prefix(keys::index_scan_prefix())?;
        entries
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(SearchError::from))
            .collect()
    }

    /// Merge a settings patch into the existing index settings. An empty
    /// patch is rejected rather than silently accepted as a no-op, since a
    /// caller almost always meant to change something.
    pub fn update_settings(&self, name: &str, patch: SettingsPatch) -> Result<IndexMeta> {
        if patch.is_empty() {
            return Err(SearchError::BadRequest("settings patch is empty".into()));
        }
        let mut meta = self.get_index(name)?;
        if let Some(track_positions) = patch.track_positions {
            meta.settings.track_positions = track_positions;
        }
        if let Some(max_posting_list_size) = patch.max_posting_list_size {
            meta.settings.max_posting_list_size = max_posting_list_size;
        }
        let bytes = bincode::serialize(&meta)?;
        self.kv.put(&keys::index_key(name), bytes)?;
        Ok(meta)
    }

    pub fn update_mappings(&self, name: &str, mappings: HashMap<String, Mapping>) -> Result<IndexMeta> {
        let mut meta = self.get_index(name)?;
        meta.mappings.extend(mappings);
        let bytes = bincode::serialize(&meta)?;
        self.kv.put(&keys::index_key(name), bytes)?;
        Ok(meta)
    }

    /// Infer a mapping for any field the index doesn't already have one for,
    /// by sampling up to ten stored documents: short strings become
    /// `keyword`, longer or whitespace-containing strings become `text`,
    /// date-like strings become `date`, whole numbers become `integer`,
    /// fractional numbers become `float`, arrays of strings become
    /// `keyword`, arrays of objects become `nested`, and objects become
    /// `object`.
    pub fn auto_detect_mappings(&self, name: &str, default_analyzer: &str) -> Result<IndexMeta> {
        let mut meta = self.get_index(name)?;
        let sample = self.docs.scan(name, |_| true, 0, 10)?;

        let mut discovered = HashMap::new();
        for (_, doc) in &sample {
            collect_field_types(doc, "", &mut discovered);
        }

        let mut changed = false;
        for (field, field_type) in discovered {
            if meta.mappings.contains_key(&field) {
                continue;
            }
            let analyzer = if field_type == "text" { default_analyzer.to_string() } else { "keyword".to_string() };
            meta.mappings.insert(field, Mapping { field_type, analyzer, boost: 1.0, subfields: HashMap::new() });
            changed = true;
        }

        if changed {
            let bytes = bincode::serialize(&meta)?;
            self.kv.put(&keys::index_key(name), bytes)?;
        }
        Ok(meta)
    }

    /// Deletes documents, postings, stats, and metadata, in that order, then
    /// sweeps any keys `delete_document` couldn't have reached (e.g. a term
    /// whose only occurrence was indexed before a crash). Metadata is
    /// removed last, so a crash mid-deletion always leaves `index:<name>`
    /// present and a retry picks up exactly where it left off; this is what
    /// makes the operation idempotent rather than merely best-effort.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.get_index(name)?; // 404s if the index was never created, or is already fully gone

        let doc_ids: Vec<String> = self
            .docs
            .scan(name, |_| true, 0, usize::MAX)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        for doc_id in &doc_ids {
            self.delete_document(name, doc_id)?;
        }

        for prefix in [
            keys::doc_scan_prefix(name),
            format!("term:{name}:"),
            keys::stats_scan_prefix(name),
            keys::docid_map_scan_prefix(name),
        ] {
            for (key, _) in self.kv.scan_prefix(&prefix)? {
                self.kv.delete(&key)?;
            }
        }
        self.kv.delete(&keys::term_list_key(name))?;
        self.dictionary.clear_index(name);

        self.kv.delete(&keys::index_key(name))?;
        self.stats.write().unwrap().remove(name);
        log::info!("deleted index '{name}' ({} documents)", doc_ids.len());
        Ok(())
    }

    pub fn rebuild_document_count(&self, name: &str) -> Result<i64> {
        self.stats_for(name)?.rebuild_document_count(name)
    }

    /// Index (or re-index) a document: generate an id if absent, analyze
    /// every mapped field, merge the resulting per-term deltas into the
    /// dictionary, update field length and document-frequency stats, and
    /// persist the document body itself.
    ///
    /// Serialized per `(index, doc_id)`: two concurrent
    /// `index_document` calls for the same id run one after the other, and
    /// whichever acquires the guard last wins. Writes to other documents in
    /// the same index proceed without waiting on this one.
    pub fn index_document(&self, index: &str, doc_id: Option<String>, doc: JsonValue) -> Result<String> {
        let doc_id = doc_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let guard = self.doc_lock(index, &doc_id);
        let _held = guard.lock();
        self.index_document_locked(index, doc_id, doc)
    }

    fn index_document_locked(&self, index: &str, doc_id: String, doc: JsonValue) -> Result<String> {
        let meta = self.get_index(index)?;
        let numeric_doc_id = doc_id_to_numeric(&doc_id);

        if self.docs.exists(index, &doc_id)? {
            self.delete_document_locked(index, &doc_id)?;
        }

        let stats = self.stats_for(index)?;
        let mut tokens_by_field = HashMap::new();
        flatten_and_tokenize_for_mappings(&doc, &meta.mappings, &self.analyzers, &mut tokens_by_field)?;

        for (field, tokens) in &tokens_by_field {
            let mut by_term: HashMap<&str, PostingList> = HashMap::new();
            for token in tokens {
                let position = if meta.settings.track_positions { Some(token.position) } else { None };
                by_term.entry(token.text.as_str()).or_default().add(numeric_doc_id, 1, position);
            }

            for (term, delta) in &by_term {
                let was_new_term = self.dictionary.get(index, field, term)?.is_none();
                self.dictionary.merge(index, field, term, delta)?;
                if was_new_term {
                    stats.adjust_document_frequency(index, field, term, 1)?;
                }
            }

            stats.record_field_length(index, field, tokens.len() as i64)?;
            stats.set_doc_field_length(index, field, numeric_doc_id, tokens.len() as u32)?;
        }

        self.docs.put(index, &doc_id, &doc)?;
        self.kv.put(&keys::docid_map_key(index, numeric_doc_id), doc_id.as_bytes().to_vec())?;
        stats.record_document_added(index)?;

        Ok(doc_id)
    }

    pub fn get_document(&self, index: &str, doc_id: &str) -> Result<Option<JsonValue>> {
        self.docs.get(index, doc_id)
    }

    pub fn delete_document(&self, index: &str, doc_id: &str) -> Result<()> {
        let guard = self.doc_lock(index, doc_id);
        let _held = guard.lock();
        self.delete_document_locked(index, doc_id)
    }

    fn delete_document_locked(&self, index: &str, doc_id: &str) -> Result<()> {
        let meta = self.get_index(index)?;
        let Some(doc) = self.docs.get(index, doc_id)? else {
            return Ok(());
        };
        let numeric_doc_id = doc_id_to_numeric(doc_id);
        let stats = self.stats_for(index)?;

        let mut tokens_by_field = HashMap::new();
        flatten_and_tokenize_for_mappings(&doc, &meta.mappings, &self.analyzers, &mut tokens_by_field)?;

        for (field, tokens) in &tokens_by_field {
            let mut seen_terms: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
            seen_terms.sort_unstable();
            seen_terms.dedup();
            for term in seen_terms {
                self.dictionary.remove_doc(index, field, term, numeric_doc_id)?;
                stats.adjust_document_frequency(index, field, term, -1)?;
            }
            stats.record_field_length(index, field, -(tokens.len() as i64))?;
            stats.clear_doc_field_length(index, field, numeric_doc_id)?;
        }

        self.docs.delete(index, doc_id)?;
        self.kv.delete(&keys::docid_map_key(index, numeric_doc_id))?;
        stats.record_document_removed(index)?;
        Ok(())
    }

    /// Upsert many documents. Each document's analysis and merge runs on
    /// the rayon pool; per-`(index, doc_id)` locking still serializes any
    /// two documents that happen to share an id, so parallelism only
    /// applies across genuinely independent documents. A failure on one
    /// document never prevents the rest of the batch from landing.
    pub fn bulk_index(&self, index: &str, docs: Vec<(Option<String>, JsonValue)>) -> BulkResult {
        let outcomes: Vec<(String, Result<String>)> = docs
            .into_par_iter()
            .map(|(doc_id, doc)| {
                let label = doc_id.clone().unwrap_or_else(|| "<generated>".to_string());
                (label, self.index_document(index, doc_id, doc))
            })
            .collect();

        let mut result = BulkResult::default();
        for (label, outcome) in outcomes {
            match outcome {
                Ok(_) => result.success_count += 1,
                Err(e) => result.failures.push((label, e.to_string())),
            }
        }
        result
    }

    pub fn analyzers(&self) -> &AnalyzerRegistry {
        &self.analyzers
    }

    pub fn stats(&self, index: &str) -> Result<Arc<IndexStats>> {
        self.stats_for(index)
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn docs(&self) -> &DocStore {
        &self.docs
    }

    pub fn dictionary(&self) -> &TermDictionary {
        &self.dictionary
    }

    /// Resolve a numeric doc id (the posting-list key space) back to the
    /// original external string doc id for hydration.
    pub fn resolve_doc_id(&self, index: &str, numeric_doc_id: u64) -> Result<Option<String>> {
        match self.kv.get(&keys::docid_map_key(index, numeric_doc_id))? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            None => Ok(None),
        }
    }

    /// All live doc ids in an index, used by `match_all`.
    pub fn all_doc_ids(&self, index: &str) -> Result<Vec<u64>> {
        let entries = self.kv.scan_prefix(&keys::docid_map_scan_prefix(index))?;
        let prefix = keys::docid_map_scan_prefix(index);
        entries
            .into_iter()
            .map(|(key, _)| {
                key[prefix.len()..]
                    .parse::<u64>()
                    .map_err(|e| SearchError::CorruptRecord(format!("malformed docid_map key: {e}")))
            })
            .collect()
    }
}

/// Stable numeric doc id derived from the string id, used by posting lists
/// (which key on `u64`) while the document store keeps the original string
/// id as the externally visible identity.
pub(crate) fn doc_id_to_numeric(doc_id: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = ahash::AHasher::default();
    doc_id.hash(&mut hasher);
    hasher.finish()
}

/// A string counts as date-like if it parses fully as an RFC 3339 timestamp
/// or a bare `YYYY-MM-DD` date.
fn is_date_like(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok() || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn collect_field_types(value: &JsonValue, path: &str, out: &mut HashMap<String, String>) {
    match value {
        JsonValue::String(s) => {
            let field_type = if is_date_like(s) {
                "date"
            } else if s.len() > 50 || s.contains(char::is_whitespace) {
                "text"
            } else {
                "keyword"
            };
            out.insert(path.to_string(), field_type.to_string());
        }
        JsonValue::Number(n) => {
            let field_type = if n.is_i64() || n.is_u64() { "integer" } else { "float" };
            out.insert(path.to_string(), field_type.to_string());
        }
        JsonValue::Bool(_) => {
            out.insert(path.to_string(), "boolean".to_string());
        }
        JsonValue::Array(items) => {
            if items.is_empty() {
                return;
            }
            if items.iter().any(|i| i.is_object()) {
                if !path.is_empty() {
                    out.insert(path.to_string(), "nested".to_string());
                }
                for item in items {
                    collect_field_types(item, path, out);
                }
            } else if items.iter().any(|i| i.is_string()) {
                if !path.is_empty() {
                    out.insert(path.to_string(), "keyword".to_string());
                }
            } else {
                for item in items {
                    collect_field_types(item, path, out);
                }
            }
        }
        JsonValue::Object(map) => {
            if !path.is_empty() {
                out.insert(path.to_string(), "object".to_string());
            }
            for (key, child) in map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                collect_field_types(child, &child_path, out);
            }
        }
        JsonValue::Null => {}
    }
}

fn flatten_and_tokenize_for_mappings(
    doc: &JsonValue,
    mappings: &HashMap<String, Mapping>,
    analyzers: &AnalyzerRegistry,
    out: &mut HashMap<String, Vec<crate::analysis::Token>>,
) -> Result<()> {
    let mut raw = HashMap::new();
    let default_analyzer = analyzers.get("standard")?;
    flatten_and_tokenize(doc, "", default_analyzer.as_ref(), &mut raw);

    for (field, default_tokens) in raw {
        match mappings.get(&field) {
            Some(mapping) => {
                let analyzer = analyzers.get(&mapping.analyzer)?;
                let mut reanalyzed = HashMap::new();
                if let Some(value) = lookup_path(doc, &field) {
                    flatten_and_tokenize(value, &field, analyzer.as_ref(), &mut reanalyzed);
                }
                out.extend(reanalyzed);
            }
            None => {
                out.insert(field, default_tokens);
            }
        }
    }
    Ok(())
}

fn lookup_path<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
