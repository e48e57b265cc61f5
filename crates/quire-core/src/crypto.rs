//! Ed25519 identities.
//!
//! Wallet accounts sign one session challenge; session keys sign every key
//! request made under that session. An account is addressed by a hash of
//! its verifying key, see [`AccountAddress::from_public_key`].

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::AccountAddress;

/// Verifying half of an Ed25519 key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(#[serde(with = "crate::serde_fixed")] pub [u8; 32]);

/// Detached Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed25519Signature(#[serde(with = "crate::serde_fixed")] pub [u8; 64]);

impl Ed25519PublicKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn address(&self) -> AccountAddress {
        AccountAddress::from_public_key(self)
    }

    /// Check `signature` over `message`.
    ///
    /// Uses strict verification so that a signature has exactly one valid
    /// encoding.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        key.verify_strict(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl Ed25519Signature {
    /// Placeholder that never verifies.
    pub const ZERO: Self = Self([0u8; 64]);

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519:{}", &self.to_hex()[..12])
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig:{}..", &self.to_hex()[..12])
    }
}

/// An Ed25519 signing key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Deterministic key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn address(&self) -> AccountAddress {
        self.public_key().address()
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keypair").field(&self.public_key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_binds_message_and_key() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let sig = alice.sign(b"session challenge");

        assert!(alice.public_key().verify(b"session challenge", &sig).is_ok());
        assert!(matches!(
            alice.public_key().verify(b"session challengE", &sig),
            Err(CoreError::InvalidSignature)
        ));
        assert!(matches!(
            bob.public_key().verify(b"session challenge", &sig),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_zero_signature_never_verifies() {
        let key = Keypair::generate();
        assert!(key.public_key().verify(b"", &Ed25519Signature::ZERO).is_err());
    }

    #[test]
    fn test_address_follows_seed() {
        let a = Keypair::from_seed(&[7; 32]);
        assert_eq!(a.address(), Keypair::from_seed(&[7; 32]).address());
        assert_ne!(a.address(), Keypair::from_seed(&[8; 32]).address());
        assert_eq!(a.address(), a.public_key().address());
    }

    #[test]
    fn test_debug_does_not_print_secret() {
        let key = Keypair::from_seed(&[9; 32]);
        let shown = format!("{key:?}");
        assert!(shown.starts_with("Keypair(ed25519:"));
        assert!(!shown.contains(&hex::encode([9u8; 32])));
    }

    #[test]
    fn test_signature_text_and_binary_forms() {
        let sig = Keypair::from_seed(&[3; 32]).sign(b"msg");

        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json, format!("\"{}\"", sig.to_hex()));
        assert_eq!(serde_json::from_str::<Ed25519Signature>(&json).unwrap(), sig);

        let mut cbor = Vec::new();
        ciborium::into_writer(&sig, &mut cbor).unwrap();
        assert_eq!(ciborium::from_reader::<Ed25519Signature, _>(cbor.as_slice()).unwrap(), sig);
    }
}
