//! Error types for Quire core.

use thiserror::Error;

use crate::types::ObjectId;

/// Reasons an identifier fails to parse as a 32-byte address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier has {0} hex digits, at most 64 allowed")]
    TooLong(usize),

    #[error("identifier contains non-hex character {0:?}")]
    InvalidChar(char),

    #[error("unsupported identifier shape: {0}")]
    UnsupportedShape(String),
}

/// A structural check on a named input failed.
///
/// Raised before any request is built or any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Which input failed, e.g. `column_id`.
    pub field: &'static str,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    pub fn missing(field: &'static str) -> Self {
        Self::new(field, "missing")
    }
}

/// Core errors for data-model and encoding operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("installment {installment} lists {files} files, at most {max} allowed")]
    InstallmentTooLarge {
        installment: ObjectId,
        files: usize,
        max: usize,
    },

    #[error("column {column} has two installments with sequence {sequence}")]
    DuplicateSequence { column: ObjectId, sequence: u64 },

    #[error("file {0} is listed by more than one installment")]
    FileInMultipleInstallments(ObjectId),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
