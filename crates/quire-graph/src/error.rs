//! Error types for the object-graph boundary.

use thiserror::Error;

use quire_core::{CoreError, ObjectId};

/// Errors that can occur while querying or ingesting the object graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The backend failed to answer a query.
    #[error("graph backend error: {0}")]
    Backend(String),

    /// The backend broke the pagination contract.
    #[error("pagination error: {0}")]
    Pagination(String),

    /// Pagination did not finish within the configured page budget.
    #[error("query did not finish within {0} pages")]
    TooManyPages(usize),

    /// An object payload could not be parsed into the data model.
    #[error("malformed {object_type} object {id}: {reason}")]
    Malformed {
        object_type: String,
        id: ObjectId,
        reason: String,
    },

    /// The assembled snapshot violates a data-model invariant.
    #[error("ledger invariant violated: {0}")]
    Core(#[from] CoreError),
}

impl GraphError {
    /// Backend and pagination failures may clear up on their own. Bad
    /// payloads and invariant violations will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphError::Backend(_) | GraphError::Pagination(_))
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
