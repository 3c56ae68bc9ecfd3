//! Error taxonomy for the search engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Bad query: {0}")]
    BadQuery(String),

    #[error("Document too large: {0}")]
    DocumentTooLarge(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unknown analyzer: {0}")]
    UnknownAnalyzer(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

/// Alias kept for call sites that talk about the storage layer specifically.
pub type StorageError = SearchError;

impl From<bincode::Error> for SearchError {
    fn from(err: bincode::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

impl From<crate::storage::checksum::ChecksumError> for SearchError {
    fn from(err: crate::storage::checksum::ChecksumError) -> Self {
        SearchError::CorruptRecord(err.to_string())
    }
}
