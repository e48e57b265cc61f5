//! Key material sealed to a session's X25519 key.
//!
//! Key servers never answer with a derived key in the clear. Each key is
//! wrapped for the encryption key the client presented with its request,
//! under a one-shot X25519 secret.

use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptionKey, EncryptionNonce, X25519PublicKey, X25519StaticSecret};
use crate::error::CryptoError;

/// A symmetric key encrypted for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    pub ephemeral_public: X25519PublicKey,
    pub ciphertext: Vec<u8>,
    pub nonce: EncryptionNonce,
}

impl SealedKey {
    /// Seal `key` for `recipient`. The same `context` is needed to open it.
    pub fn seal(
        key: &EncryptionKey,
        recipient: &X25519PublicKey,
        context: &[u8],
    ) -> Result<Self, CryptoError> {
        let sender = X25519StaticSecret::generate();
        let nonce = EncryptionNonce::generate();
        let ciphertext = wrapping_key(&sender, recipient, context).encrypt(
            key.as_bytes(),
            &nonce,
            &[],
        )?;
        Ok(Self {
            ephemeral_public: sender.public_key(),
            ciphertext,
            nonce,
        })
    }

    pub fn open(
        &self,
        recipient: &X25519StaticSecret,
        context: &[u8],
    ) -> Result<EncryptionKey, CryptoError> {
        let plain = wrapping_key(recipient, &self.ephemeral_public, context).decrypt(
            &self.ciphertext,
            &self.nonce,
            &[],
        )?;
        EncryptionKey::from_slice(&plain)
    }
}

fn wrapping_key(
    secret: &X25519StaticSecret,
    peer: &X25519PublicKey,
    context: &[u8],
) -> EncryptionKey {
    let labelled = [b"seal:".as_slice(), context].concat();
    secret.diffie_hellman(peer).derive_encryption_key(&labelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_for(recipient: &X25519StaticSecret, context: &[u8]) -> (EncryptionKey, SealedKey) {
        let key = EncryptionKey::generate();
        let sealed = SealedKey::seal(&key, &recipient.public_key(), context).unwrap();
        (key, sealed)
    }

    #[test]
    fn test_recipient_opens_with_matching_context() {
        let session = X25519StaticSecret::generate();
        let (key, sealed) = sealed_for(&session, b"server-1");
        assert_eq!(sealed.open(&session, b"server-1").unwrap(), key);
        assert_ne!(sealed.ciphertext, key.as_bytes().to_vec());
    }

    #[test]
    fn test_other_session_cannot_open() {
        let session = X25519StaticSecret::generate();
        let (_, sealed) = sealed_for(&session, b"server-1");
        let stranger = X25519StaticSecret::generate();
        assert_eq!(sealed.open(&stranger, b"server-1"), Err(CryptoError::Decryption));
    }

    #[test]
    fn test_context_is_bound() {
        let session = X25519StaticSecret::generate();
        let (_, sealed) = sealed_for(&session, b"server-1");
        assert_eq!(sealed.open(&session, b"server-2"), Err(CryptoError::Decryption));
    }

    #[test]
    fn test_each_seal_uses_fresh_sender_key() {
        let session = X25519StaticSecret::generate();
        let key = EncryptionKey::generate();
        let a = SealedKey::seal(&key, &session.public_key(), b"ctx").unwrap();
        let b = SealedKey::seal(&key, &session.public_key(), b"ctx").unwrap();
        assert_ne!(a.ephemeral_public, b.ephemeral_public);
    }

    #[test]
    fn test_survives_cbor() {
        let session = X25519StaticSecret::generate();
        let (key, sealed) = sealed_for(&session, b"ctx");
        let mut buf = Vec::new();
        ciborium::into_writer(&sealed, &mut buf).unwrap();
        let decoded: SealedKey = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(decoded.open(&session, b"ctx").unwrap(), key);
    }
}
