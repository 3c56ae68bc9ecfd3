//! Top-level wiring: the `SearchEngine` ties the key-value store, document
//! store, term dictionary, index service, query evaluator, and typo
//! tolerance together into the single object a caller constructs.
//!
//! The background document-count verifier uses a weak-referenced
//! `Arc<AtomicBool>` shutdown flag checked inside a sleeping loop, so the
//! verifier thread exits cleanly when the engine is dropped rather than
//! needing an explicit `shutdown()` call on every code path.

use crate::analysis::AnalyzerRegistry;
use crate::config::EngineConfig;
use crate::dictionary::TermDictionary;
use crate::docstore::{BulkResult, DocStore};
use crate::error::Result;
use crate::index_service::{IndexMeta, IndexService, IndexSettings, Mapping, SettingsPatch};
use crate::kv::{EmbeddedKv, KvStore};
use crate::query::{Query, SearchEnvelope};
use crate::query::QueryEvaluator;
use crate::scoring::BM25Scorer;
use crate::typo::TypoTolerance;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Result of `index_document`/`index_document_with_id`: the
/// request-surface `{id, index, version, result}` shape. This
/// crate doesn't version documents beyond "did this id already exist", so
/// `version` is a monotonically increasing counter starting at 1 on create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexResult {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct IndexDocumentResponse {
    pub id: String,
    pub index: String,
    pub result: IndexResult,
}

/// The embedded full-text search engine. One instance owns one key-value
/// store directory and every index created within it.
pub struct SearchEngine {
    config: EngineConfig,
    index_service: Arc<IndexService>,
    query_evaluator: QueryEvaluator,
    verifier_shutdown: Arc<AtomicBool>,
    verifier_handle: Option<JoinHandle<()>>,
}

impl SearchEngine {
    /// Open (creating if absent) the engine's store at `config.db_path`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::open_at(config.db_path.clone(), config)
    }

    /// Open at an explicit path, overriding `config.db_path`. Exists mainly
    /// so tests can point a shared config at a fresh `TempDir`.
    pub fn open_at(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let kv: Arc<dyn KvStore> = Arc::new(EmbeddedKv::open(path)?);
        Self::from_kv(kv, config)
    }

    /// Build an engine over an already-open store. Used by tests that want
    /// an in-memory-backed `KvStore` without touching disk.
    pub fn from_kv(kv: Arc<dyn KvStore>, config: EngineConfig) -> Result<Self> {
        let docs = DocStore::new(kv.clone(), config.max_record_size, config.compression_threshold);
        let dictionary = TermDictionary::with_posting_list_cap(
            kv.clone(),
            config.max_cache_size,
            config.max_record_size,
            config.compression_threshold,
            config.memory_check_interval,
            config.max_posting_list_size,
        );
        let index_service = Arc::new(IndexService::new(kv, docs, dictionary.clone()));

        let analyzers = Arc::new(AnalyzerRegistry::default());
        let typo = TypoTolerance::new(dictionary.clone());
        let scorer = BM25Scorer::new(config.bm25);
        let query_evaluator = QueryEvaluator::new(dictionary, analyzers, typo, scorer, config.default_analyzer.clone());

        let verifier_shutdown = Arc::new(AtomicBool::new(false));
        let verifier_handle = Some(spawn_verifier(
            Arc::downgrade(&index_service),
            Arc::downgrade(&verifier_shutdown),
            Duration::from_secs(config.stats_verify_interval_secs.max(1)),
        ));

        Ok(Self { config, index_service, query_evaluator, verifier_shutdown, verifier_handle })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- index lifecycle ------------------------------------------------------

    pub fn create_index(&self, name: &str, mappings: HashMap<String, Mapping>, settings: IndexSettings) -> Result<IndexMeta> {
        self.index_service.create_index(name, mappings, settings)
    }

    pub fn get_index(&self, name: &str) -> Result<IndexMeta> {
        self.index_service.get_index(name)
    }

    pub fn list_indices(&self) -> Result<Vec<IndexMeta>> {
        self.index_service.list_indices()
    }

    pub fn update_settings(&self, name: &str, patch: SettingsPatch) -> Result<IndexMeta> {
        self.index_service.update_settings(name, patch)
    }

    pub fn update_mappings(&self, name: &str, mappings: HashMap<String, Mapping>) -> Result<IndexMeta> {
        self.index_service.update_mappings(name, mappings)
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.index_service.delete_index(name)
    }

    pub fn rebuild_document_count(&self, name: &str) -> Result<i64> {
        self.index_service.rebuild_document_count(name)
    }

    // -- documents -----------------------------------------------------------

    pub fn index_document(&self, index: &str, doc_id: Option<String>, source: JsonValue) -> Result<IndexDocumentResponse> {
        let existed = match &doc_id {
            Some(id) => self.index_service.get_document(index, id)?.is_some(),
            None => false,
        };
        let id = self.index_service.index_document(index, doc_id, source)?;
        Ok(IndexDocumentResponse {
            id,
            index: index.to_string(),
            result: if existed { IndexResult::Updated } else { IndexResult::Created },
        })
    }

    pub fn get_document(&self, index: &str, doc_id: &str) -> Result<Option<JsonValue>> {
        self.index_service.get_document(index, doc_id)
    }

    pub fn delete_document(&self, index: &str, doc_id: &str) -> Result<bool> {
        self.index_service.get_index(index)?;
        let existed = self.index_service.get_document(index, doc_id)?.is_some();
        self.index_service.delete_document(index, doc_id)?;
        Ok(existed)
    }

    pub fn bulk_index(&self, index: &str, docs: Vec<(Option<String>, JsonValue)>) -> BulkResult {
        self.index_service.bulk_index(index, docs)
    }

    /// Delete every document a query matches. Returns the number of
    /// documents actually removed and any per-document failures.
    pub fn delete_by_query(&self, index: &str, query: &Query) -> Result<(usize, Vec<(String, String)>)> {
        let doc_ids = self.query_evaluator.matching_doc_ids(&self.index_service, index, query)?;
        let mut deleted = 0;
        let mut failures = Vec::new();
        for numeric_id in doc_ids {
            let Some(string_id) = self.index_service.resolve_doc_id(index, numeric_id)? else {
                continue;
            };
            match self.index_service.delete_document(index, &string_id) {
                Ok(()) => deleted += 1,
                Err(e) => failures.push((string_id, e.to_string())),
            }
        }
        Ok((deleted, failures))
    }

    // -- search ---------------------------------------------------------------

    pub fn search(&self, index: &str, query: &Query, from: usize, size: usize, timeout: Option<Duration>) -> Result<SearchEnvelope> {
        let deadline = timeout.map(|d| Instant::now() + d);
        self.query_evaluator.search(&self.index_service, index, query, from, size, deadline)
    }

    pub fn suggest(&self, index: &str, prefix: &str, field: Option<&str>) -> Result<Vec<(String, u64)>> {
        self.query_evaluator.suggest(&self.index_service, index, prefix, field)
    }

    pub fn auto_detect_mappings(&self, index: &str) -> Result<IndexMeta> {
        self.index_service.auto_detect_mappings(index, &self.config.default_analyzer)
    }

    pub fn index_service(&self) -> &IndexService {
        &self.index_service
    }
}

impl Drop for SearchEngine {
    fn drop(&mut self) {
        self.verifier_shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.verifier_handle.take() {
            let _ = handle.join();
        }
    }
}

/// The document-count verifier: on a fixed interval,
/// rescan every index and correct any drift between the atomic counter and
/// the actual document-store contents. Runs on weak references so the
/// thread exits as soon as the engine (and therefore the last strong
/// reference) is dropped, rather than keeping it alive.
fn spawn_verifier(
    index_service: std::sync::Weak<IndexService>,
    shutdown: std::sync::Weak<AtomicBool>,
    interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let Some(flag) = shutdown.upgrade() else { return };
        if flag.load(Ordering::Relaxed) {
            return;
        }

        // Sleep in short increments so shutdown is observed promptly rather
        // than waiting out a potentially hour-long interval.
        let step = Duration::from_millis(200).min(interval);
        let mut slept = Duration::ZERO;
        while slept < interval {
            thread::sleep(step);
            slept += step;
            let Some(flag) = shutdown.upgrade() else { return };
            if flag.load(Ordering::Relaxed) {
                return;
            }
        }

        let Some(service) = index_service.upgrade() else { return };
        match service.list_indices() {
            Ok(indices) => {
                for meta in indices {
                    if let Err(e) = service.rebuild_document_count(&meta.name) {
                        log::warn!("document-count verifier failed for index '{}': {e}", meta.name);
                    }
                }
            }
            Err(e) => log::warn!("document-count verifier could not list indices: {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_engine() -> (TempDir, SearchEngine) {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::for_testing().with_db_path(dir.path().to_string_lossy().to_string());
        let engine = SearchEngine::open_at(dir.path(), config).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_create_index_and_search_round_trip() {
        let (_dir, engine) = test_engine();
        engine.create_index("books", HashMap::new(), IndexSettings::default()).unwrap();
        engine.index_document("books", Some("1".into()), json!({"title": "Rust in Action"})).unwrap();

        let query = Query::from_json(&json!({"match": {"value": "rust"}})).unwrap();
        let envelope = engine.search("books", &query, 0, 10, None).unwrap();
        assert_eq!(envelope.total, 1);
        assert_eq!(envelope.hits[0].id, "1");
    }

    #[test]
    fn test_equal_score_hits_tie_break_by_doc_id_ascending() {
        let (_dir, engine) = test_engine();
        engine.create_index("books", HashMap::new(), IndexSettings::default()).unwrap();
        for id in ["zzz", "aaa", "mmm"] {
            engine.index_document("books", Some(id.into()), json!({"title": "rust"})).unwrap();
        }

        let query = Query::from_json(&json!({"match": {"value": "rust"}})).unwrap();
        let envelope = engine.search("books", &query, 0, 10, None).unwrap();
        let ids: Vec<&str> = envelope.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "mmm", "zzz"]);
    }

    #[test]
    fn test_index_document_reports_created_then_updated() {
        let (_dir, engine) = test_engine();
        engine.create_index("books", HashMap::new(), IndexSettings::default()).unwrap();

        let first = engine.index_document("books", Some("1".into()), json!({"title": "a"})).unwrap();
        assert_eq!(first.result, IndexResult::Created);

        let second = engine.index_document("books", Some("1".into()), json!({"title": "b"})).unwrap();
        assert_eq!(second.result, IndexResult::Updated);
    }

    #[test]
    fn test_delete_by_query_removes_matches() {
        let (_dir, engine) = test_engine();
        engine.create_index("books", HashMap::new(), IndexSettings::default()).unwrap();
        engine.index_document("books", Some("1".into()), json!({"title": "rust"})).unwrap();
        engine.index_document("books", Some("2".into()), json!({"title": "python"})).unwrap();

        let query = Query::from_json(&json!({"term": {"field": "title", "value": "rust"}})).unwrap();
        let (deleted, failures) = engine.delete_by_query("books", &query).unwrap();
        assert_eq!(deleted, 1);
        assert!(failures.is_empty());
        assert!(engine.get_document("books", "1").unwrap().is_none());
        assert!(engine.get_document("books", "2").unwrap().is_some());
    }

    #[test]
    fn test_delete_document_reports_whether_it_existed() {
        let (_dir, engine) = test_engine();
        engine.create_index("books", HashMap::new(), IndexSettings::default()).unwrap();
        engine.index_document("books", Some("1".into()), json!({"title": "x"})).unwrap();

        assert!(engine.delete_document("books", "1").unwrap());
        assert!(!engine.delete_document("books", "1").unwrap());
    }
}
