//! Engine configuration.
//!
//! A `Default` impl plus named preset constructors for common deployment
//! profiles.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a `SearchEngine` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory the embedded key-value store persists to.
    pub db_path: String,

    /// Term dictionary chunk-cache capacity (number of chunks kept hot).
    pub max_cache_size: usize,

    /// Posting lists longer than this are subject to oldest-10%-eviction.
    pub max_posting_list_size: usize,

    /// Records (documents, posting-list chunks) above this size are rejected
    /// with `DocumentTooLarge` / `CorruptRecord` rather than silently truncated.
    pub max_record_size: usize,

    /// Size threshold above which the codec compresses a record with `snap`
    /// before persisting it.
    pub compression_threshold: usize,

    /// Number of dictionary writes between memory-pressure checks.
    pub memory_check_interval: usize,

    /// Default analyzer name used when a mapping doesn't name one.
    pub default_analyzer: String,

    /// Default BM25 parameters, used when a query doesn't override them.
    pub bm25: BM25Config,

    /// Interval, in seconds, between background document-count verification
    /// passes.
    pub stats_verify_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "ferrodex_data".to_string(),
            max_cache_size: 1000,
            max_posting_list_size: 5000,
            max_record_size: 10 * 1024 * 1024,
            compression_threshold: 4 * 1024,
            memory_check_interval: 100,
            default_analyzer: "standard".to_string(),
            bm25: BM25Config::default(),
            stats_verify_interval_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Configuration tuned for unit/integration tests: small caches, short
    /// verification interval, everything scaled down so tests stay fast.
    pub fn for_testing() -> Self {
        Self {
            db_path: "ferrodex_test_data".to_string(),
            max_cache_size: 16,
            max_posting_list_size: 128,
            max_record_size: 1024 * 1024,
            compression_threshold: 256,
            memory_check_interval: 8,
            stats_verify_interval_secs: 1,
            ..Default::default()
        }
    }

    /// Configuration tuned for large, write-heavy indices: bigger dictionary
    /// cache and posting-list budget, less frequent verification.
    pub fn for_high_volume() -> Self {
        Self {
            max_cache_size: 8192,
            max_posting_list_size: 50_000,
            max_record_size: 64 * 1024 * 1024,
            memory_check_interval: 500,
            stats_verify_interval_secs: 7200,
            ..Default::default()
        }
    }

    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = path.into();
        self
    }
}

/// BM25 scoring parameters.
///
/// Defaults match the classic Robertson/Spärck Jones recommendation
/// (k1=1.2, b=0.75).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BM25Config {
    /// Term frequency saturation parameter.
    pub k1: f32,
    /// Length normalization parameter.
    pub b: f32,
}

impl Default for BM25Config {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}
