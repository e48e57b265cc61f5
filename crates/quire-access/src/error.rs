//! Error types for the access pipeline.

use thiserror::Error;

use quire_core::{CoreError, ValidationError};

/// Errors surfaced by credential, policy, key retrieval and decryption.
///
/// `Unauthorized` is a policy decision and must not be retried with the
/// same capability. `Quorum` is transient and safe to retry.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Malformed or missing identifier; no network call was made.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The wallet owner refused to sign the session credential.
    #[error("signature request was declined")]
    SignatureDeclined,

    /// The wallet failed to produce a usable signature.
    #[error("invalid session credential: {0}")]
    InvalidCredential(String),

    /// The caller holds no capability that grants access.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Not enough key servers answered validly.
    #[error(
        "key server quorum not reached: {valid} valid of {required} required \
         ({denied} denied, {failed} unreachable or invalid)"
    )]
    Quorum {
        required: usize,
        valid: usize,
        denied: usize,
        failed: usize,
    },

    /// Key material does not open this ciphertext.
    #[error("no access: {0}")]
    NoAccess(String),

    /// The ciphertext is malformed, tampered with, or bound elsewhere.
    #[error("format error: {0}")]
    Format(String),

    /// Local misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Encoding failure while building a request.
    #[error("encoding error: {0}")]
    Encoding(#[from] CoreError),
}

impl AccessError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::Quorum { .. })
    }
}

/// Errors returned by a single key server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyServerError {
    /// The server evaluated the policy and refused.
    #[error("denied: {0}")]
    Denied(String),

    /// The request could not be verified (signature, credential, encoding).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors returned by a wallet signer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignError {
    #[error("user declined to sign")]
    Declined,

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Low-level AEAD failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encryption,

    #[error("authenticated decryption failed")]
    Decryption,

    #[error("invalid key length: expected 32, got {0}")]
    KeyLength(usize),
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
