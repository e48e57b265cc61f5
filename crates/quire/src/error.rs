//! Error types for the reader facade.

use thiserror::Error;

use quire_access::AccessError;
use quire_core::{ObjectId, ValidationError};
use quire_graph::GraphError;

/// Why a file could not be read.
///
/// Every failure is one of these; the reader never stands an empty value
/// in for a failure.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Malformed or missing identifier. Nothing left the process.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The wallet owner declined to sign the session credential.
    #[error("signature request was declined")]
    SignatureDeclined,

    /// The wallet produced an unusable signature.
    #[error("invalid session credential: {0}")]
    InvalidCredential(String),

    /// Content is unknown, has never been uploaded, or no mirror serves it.
    #[error("{id} not found: {detail}")]
    NotFound { id: ObjectId, detail: String },

    /// The account holds no capability that grants access.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Too few key servers answered; safe to retry.
    #[error("{0}")]
    Quorum(String),

    /// Key material did not open the content.
    #[error("no access: {0}")]
    NoAccess(String),

    /// The content is malformed, tampered with, or bound elsewhere.
    #[error("format error: {0}")]
    Format(String),

    /// The object graph could not be read.
    #[error("object graph error: {0}")]
    Graph(#[from] GraphError),

    /// The caller aborted the request.
    #[error("request cancelled")]
    Cancelled,

    /// Local misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<AccessError> for ReaderError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Validation(e) => ReaderError::Validation(e),
            AccessError::SignatureDeclined => ReaderError::SignatureDeclined,
            AccessError::InvalidCredential(s) => ReaderError::InvalidCredential(s),
            AccessError::Unauthorized(s) => ReaderError::Unauthorized(s),
            e @ AccessError::Quorum { .. } => ReaderError::Quorum(e.to_string()),
            AccessError::NoAccess(s) => ReaderError::NoAccess(s),
            AccessError::Format(s) => ReaderError::Format(s),
            AccessError::Config(s) => ReaderError::Config(s),
            AccessError::Encoding(e) => ReaderError::Format(e.to_string()),
        }
    }
}

impl ReaderError {
    /// Whether the same request may succeed later without any change by
    /// the user.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReaderError::Quorum(_) => true,
            ReaderError::Graph(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Text suitable for showing to the reader.
    ///
    /// Distinguishes "you have no rights" (subscribe) from "the network is
    /// in trouble" (retry).
    pub fn user_message(&self) -> String {
        match self {
            ReaderError::Validation(e) => {
                format!("This link looks broken ({} is invalid).", e.field)
            }
            ReaderError::SignatureDeclined => {
                "You declined the signature request. Sign in to read this file.".into()
            }
            ReaderError::InvalidCredential(_) => {
                "Your wallet could not sign you in. Reconnect it and try again.".into()
            }
            ReaderError::NotFound { .. } => {
                "This file is not available from any storage mirror right now.".into()
            }
            ReaderError::Unauthorized(_) => {
                "You do not have access to this column. Subscribe to read it.".into()
            }
            ReaderError::Quorum(_) => {
                "Could not reach enough key servers. Please try again in a moment.".into()
            }
            ReaderError::Graph(e) if e.is_transient() => {
                "Could not load the column catalogue. Please try again in a moment.".into()
            }
            ReaderError::Graph(_) => {
                "The column catalogue contains invalid data for this file.".into()
            }
            ReaderError::NoAccess(_) => {
                "Your access could not unlock this file. Check your subscription.".into()
            }
            ReaderError::Format(_) => "This file appears to be corrupted.".into(),
            ReaderError::Cancelled => "Request cancelled.".into(),
            ReaderError::Config(_) => "The reader is misconfigured.".into(),
        }
    }
}

/// Result type for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;
