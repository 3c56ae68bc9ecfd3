//! Ferrodex: an embedded inverted-index text search engine.
//!
//! Given a stream of JSON documents added under named indices, the engine
//! maintains an inverted index that supports ranked full-text search, exact
//! term filtering, wildcard/prefix queries, boolean composition, and
//! typo-tolerant suggestions. Results are ranked by BM25 with per-field
//! boosts configurable via index mappings.
//!
//! ## Layout
//! - `kv` — the durable ordered key-value store adapter (§4.2)
//! - `codec` — posting-list and document wire framing (§4.1)
//! - `analysis` — tokenizers and the analyzer registry (§4.3)
//! - `postings` — the in-memory posting list (§4.4)
//! - `dictionary` — the LRU-cached, write-through term dictionary (§4.5)
//! - `docstore` — source document storage (§4.6)
//! - `index_service` — index lifecycle and document ingestion (§4.7)
//! - `stats` — per-index document/field/term statistics (part of §3)
//! - `scoring` — BM25 (§4.8)
//! - `query` — query parsing and evaluation (§4.9)
//! - `typo` — edit-distance term expansion (§4.10)
//! - `engine` — `SearchEngine`, the object a caller constructs

pub mod analysis;
pub mod codec;
pub mod config;
pub mod dictionary;
pub mod docstore;
pub mod engine;
pub mod index_service;
pub mod kv;
pub mod postings;
pub mod query;
pub mod scoring;
pub mod stats;
pub mod storage;
pub mod typo;

mod error;

pub use config::{BM25Config, EngineConfig};
pub use engine::{IndexDocumentResponse, IndexResult, SearchEngine};
pub use error::{Result, SearchError, StorageError};
pub use index_service::{IndexMeta, IndexSettings, Mapping, SettingsPatch};
pub use query::{Hit, Query, SearchEnvelope, Suggestion};
