//! # Quire Core
//!
//! Pure data for Quire: identifiers, the column / installment / file model,
//! an indexed ledger snapshot, Ed25519 primitives and canonical CBOR.
//!
//! This crate contains no I/O and no networking.
//!
//! ## Key Types
//!
//! - [`ObjectId`] / [`AccountAddress`] - 32-byte addresses, normalized once on ingestion
//! - [`BindingId`] - the value a blob's key material is bound to
//! - [`Capability`] - creator or subscriber proof, exactly one per decryption
//! - [`LedgerSnapshot`] - read-only view of the ledger objects
//!
//! ## Identifier Normalization
//!
//! Upstream objects may carry an identifier as a string or as an object
//! wrapping one. [`ObjectId::from_json`] and the `Deserialize` impls accept
//! every shape; nothing downstream re-derives ids ad hoc.

pub mod canonical;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod model;
pub mod serde_fixed;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, IdError, Result, ValidationError};
pub use ledger::{LedgerBuilder, LedgerSnapshot, DEFAULT_MAX_FILES_PER_INSTALLMENT};
pub use model::{
    Capability, Column, ColumnStatus, CreatorCap, FileMeta, Installment, PaymentPolicy,
    ResolvedFile, Subscription,
};
pub use types::{parse_address, AccountAddress, BindingId, BlobHandle, ObjectId};
