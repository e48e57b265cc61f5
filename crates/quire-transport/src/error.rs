//! Error types for blob retrieval.

use thiserror::Error;

use quire_core::BlobHandle;

/// Failure of one mirror for one blob. Absorbed by the retriever.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    /// The mirror answered with a non-2xx status.
    #[error("mirror returned status {0}")]
    Status(u16),

    /// The mirror could not be reached or the body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out")]
    Timeout,
}

/// Failure to retrieve one blob.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Every mirror was tried and none served the blob.
    #[error("blob {handle} not found on any of {attempts} mirrors")]
    NotFound { handle: BlobHandle, attempts: usize },

    /// The caller aborted the fetch.
    #[error("fetch aborted")]
    Aborted,
}

/// Result type for retrieval.
pub type Result<T> = std::result::Result<T, FetchError>;
