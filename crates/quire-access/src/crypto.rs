//! X25519 agreement and ChaCha20-Poly1305 sealing.
//!
//! Every symmetric key in the pipeline comes out of
//! [`SharedKey::derive_encryption_key`]: Blake3 in key-derivation mode over
//! the X25519 output and a context naming what the key protects.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;

const KDF_LABEL: &str = "quire-v0-encryption";

fn random<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

/// X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(#[serde(with = "quire_core::serde_fixed")] pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x25519:{}", hex::encode(&self.0[..6]))
    }
}

/// X25519 secret.
///
/// Key servers hold one as their master secret, session credentials hold
/// one to receive sealed key material, and encryptors generate one per
/// object or sealed key.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        Self::from_bytes(random())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(PublicKey::from(&self.0).to_bytes())
    }

    pub fn diffie_hellman(&self, peer: &X25519PublicKey) -> SharedKey {
        SharedKey(self.0.diffie_hellman(&PublicKey::from(peer.0)).to_bytes())
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("X25519StaticSecret")
            .field(&self.public_key())
            .finish()
    }
}

/// Raw X25519 output. Never used as a key directly.
#[derive(Clone)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive the symmetric key for `context`.
    pub fn derive_encryption_key(&self, context: &[u8]) -> EncryptionKey {
        let hash = blake3::Hasher::new_derive_key(KDF_LABEL)
            .update(&self.0)
            .update(context)
            .finalize();
        EncryptionKey(*hash.as_bytes())
    }
}

/// ChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn generate() -> Self {
        Self(random())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        <[u8; 32]>::try_from(bytes)
            .map(Self)
            .map_err(|_| CryptoError::KeyLength(bytes.len()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    pub fn encrypt(
        &self,
        plaintext: &[u8],
        nonce: &EncryptionNonce,
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = Payload { msg: plaintext, aad };
        self.cipher()
            .encrypt(Nonce::from_slice(&nonce.0), payload)
            .map_err(|_| CryptoError::Encryption)
    }

    /// Fails unless both the ciphertext and `aad` are authentic.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &EncryptionNonce,
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = Payload { msg: ciphertext, aad };
        self.cipher()
            .decrypt(Nonce::from_slice(&nonce.0), payload)
            .map_err(|_| CryptoError::Decryption)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(redacted)")
    }
}

/// 96-bit ChaCha20-Poly1305 nonce. Always random, never reused per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; 12]);

impl EncryptionNonce {
    pub fn generate() -> Self {
        Self(random())
    }
}
