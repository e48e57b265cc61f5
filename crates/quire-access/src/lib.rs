//! # Quire Access
//!
//! Everything between "this account wants file F" and "here are the bytes":
//! session credentials, authorization requests, threshold key retrieval and
//! local decryption.
//!
//! ## Encryption Model
//!
//! 1. **Content key**: a random ChaCha20-Poly1305 key seals the file body,
//!    with the file's [`BindingId`](quire_core::BindingId) as associated data
//! 2. **Shares**: the content key is split so that any `t` of `n` key
//!    servers can reconstruct it
//! 3. **Share keys**: each share is sealed under a key derived from an
//!    X25519 agreement with one server and the binding
//!
//! A key server re-derives its share key only after evaluating an
//! [`AuthorizationRequest`] against the ledger, and returns it sealed to
//! the session's X25519 key.
//!
//! ## Key Types
//!
//! - [`CredentialManager`] - single-slot cache of the signed [`SessionCredential`]
//! - [`AuthorizationRequest`] - creator or subscriber predicate, built by [`build`]
//! - [`KeyServerClient`] - batched, threshold key retrieval
//! - [`DecryptionEngine`] - offline, authenticated decryption
//! - [`LocalKeyServer`] - reference key server
//!
//! ## Usage
//!
//! ```rust,no_run
//! use quire_access::{
//!     build, AccessRole, DecryptionEngine, EncryptedObject, ObjectRef, ResourceIds,
//! };
//!
//! // let request = build(&AccessRole::Creator { cap_id }, &ResourceIds { .. })?;
//! // let credential = credentials.get_or_create(&account).await?;
//! // let header = EncryptedObject::parse_header(&blob)?;
//! // let material = client
//! //     .fetch_keys(&[ObjectRef::from(&header)], &request, &credential)
//! //     .await?;
//! // let plaintext = DecryptionEngine::new()
//! //     .decrypt(&blob, material.get(&header.binding).unwrap())?;
//! ```

pub mod credential;
pub mod crypto;
pub mod decrypt;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod policy;
pub mod sealed;
pub mod server;
pub mod shamir;
pub mod tx;

pub use credential::{
    challenge_message, Certificate, CredentialConfig, CredentialManager, SessionCredential,
    WalletSignature, WalletSigner, DEFAULT_TTL_MINUTES,
};
pub use crypto::{
    EncryptionKey, EncryptionNonce, SharedKey, X25519PublicKey, X25519StaticSecret,
};
pub use decrypt::DecryptionEngine;
pub use envelope::{
    derive_share_key, EncryptedObject, EncryptedObjectBuilder, KeyServerPublic, ObjectHeader,
    ServerShare, FORMAT_VERSION, MAGIC,
};
pub use error::{AccessError, CryptoError, KeyServerError, Result, SignError};
pub use keys::{
    DerivedKey, FetchKeyRequest, FetchKeyResponse, KeyMaterial, KeyServer, KeyServerClient,
    KeyServerConfig, ObjectKeys, ObjectRef,
};
pub use policy::{
    build, parse_id, select_capability, AccessRole, AuthorizationRequest, Denial, ResourceIds,
};
pub use sealed::SealedKey;
pub use server::{LocalKeyServer, MAX_CHECKS_PER_TX};
pub use tx::{AccessCheck, AuthorizationTx};
