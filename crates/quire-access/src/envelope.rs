//! Encrypted object format.
//!
//! A file's plaintext is sealed under a random content key. The content key
//! is split into one share per key server; each share is sealed under a key
//! only that server can re-derive, and only for this object's binding.
//!
//! ```text
//! MAGIC "QUIR" || version (1 byte) || CBOR(header) || body
//! ```
//!
//! The body is ChaCha20-Poly1305 ciphertext with the 64-byte binding as
//! associated data.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use quire_core::{BindingId, ObjectId};

use crate::crypto::{
    EncryptionKey, EncryptionNonce, SharedKey, X25519PublicKey, X25519StaticSecret,
};
use crate::error::{AccessError, Result};
use crate::shamir;

/// Leading bytes of every encrypted object.
pub const MAGIC: [u8; 4] = *b"QUIR";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// A key server's identity and long-term X25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyServerPublic {
    pub id: ObjectId,
    pub public_key: X25519PublicKey,
}

/// One key server's sealed share of the content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerShare {
    pub server_id: ObjectId,
    /// Shamir evaluation point.
    pub index: u8,
    pub nonce: EncryptionNonce,
    pub encrypted_share: Vec<u8>,
}

/// Everything needed to request keys for, and then open, an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub binding: BindingId,
    pub threshold: u8,
    /// Encryptor's X25519 public key, combined with each server's secret.
    pub ephemeral_public: X25519PublicKey,
    pub shares: Vec<ServerShare>,
    pub body_nonce: EncryptionNonce,
}

impl ObjectHeader {
    /// Structural checks that do not need any key.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(AccessError::Format("threshold is zero".into()));
        }
        if usize::from(self.threshold) > self.shares.len() {
            return Err(AccessError::Format(format!(
                "threshold {} exceeds share count {}",
                self.threshold,
                self.shares.len()
            )));
        }

        let mut servers = HashSet::new();
        let mut indices = HashSet::new();
        for share in &self.shares {
            if share.index == 0 {
                return Err(AccessError::Format("share index 0 is reserved".into()));
            }
            if !servers.insert(share.server_id) {
                return Err(AccessError::Format(format!(
                    "server {} appears twice",
                    share.server_id
                )));
            }
            if !indices.insert(share.index) {
                return Err(AccessError::Format(format!(
                    "share index {} appears twice",
                    share.index
                )));
            }
        }
        Ok(())
    }

    /// The share sealed for `server_id`, if any.
    pub fn share_for(&self, server_id: &ObjectId) -> Option<&ServerShare> {
        self.shares.iter().find(|s| &s.server_id == server_id)
    }
}

/// A parsed encrypted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedObject {
    pub header: ObjectHeader,
    pub body: Vec<u8>,
}

impl EncryptedObject {
    /// Serialize to the wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(MAGIC.len() + 1 + 256 + self.body.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);
        ciborium::into_writer(&self.header, &mut buf)
            .map_err(|e| AccessError::Format(format!("header encoding failed: {e}")))?;
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    /// Parse and validate the wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, body) = split_wire(bytes)?;
        Ok(Self {
            header,
            body: body.to_vec(),
        })
    }

    /// Parse only the header.
    pub fn parse_header(bytes: &[u8]) -> Result<ObjectHeader> {
        split_wire(bytes).map(|(header, _)| header)
    }

    pub fn binding(&self) -> &BindingId {
        &self.header.binding
    }
}

fn split_wire(bytes: &[u8]) -> Result<(ObjectHeader, &[u8])> {
    let rest = bytes
        .strip_prefix(&MAGIC)
        .ok_or_else(|| AccessError::Format("missing magic bytes".into()))?;
    let (&version, mut rest) = rest
        .split_first()
        .ok_or_else(|| AccessError::Format("truncated before version".into()))?;
    if version != FORMAT_VERSION {
        return Err(AccessError::Format(format!(
            "unsupported format version {version}"
        )));
    }

    let header: ObjectHeader = ciborium::from_reader(&mut rest)
        .map_err(|e| AccessError::Format(format!("malformed header: {e}")))?;
    header.validate()?;
    Ok((header, rest))
}

/// KDF context for a server's share key: the share is usable only for
/// this binding and this server.
fn share_context(binding: &BindingId, server_id: &ObjectId) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + 64 + 32);
    out.extend_from_slice(b"share:");
    out.extend_from_slice(&binding.to_bytes());
    out.extend_from_slice(server_id.as_bytes());
    out
}

/// Derive the key that seals `server_id`'s share of an object bound to
/// `binding`.
///
/// The encryptor computes it from its ephemeral secret and the server's
/// public key; the server computes the same value from its master secret
/// and the header's ephemeral public key.
pub fn derive_share_key(
    shared: &SharedKey,
    binding: &BindingId,
    server_id: &ObjectId,
) -> EncryptionKey {
    shared.derive_encryption_key(&share_context(binding, server_id))
}

/// Builder for encrypted objects.
pub struct EncryptedObjectBuilder {
    binding: BindingId,
    plaintext: Vec<u8>,
    threshold: usize,
}

impl EncryptedObjectBuilder {
    /// Start building an object bound to `binding`. Threshold defaults to 2.
    pub fn new(binding: BindingId, plaintext: impl Into<Vec<u8>>) -> Self {
        Self {
            binding,
            plaintext: plaintext.into(),
            threshold: 2,
        }
    }

    /// Number of key servers whose keys are needed to open the object.
    pub fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Encrypt for the given key servers.
    pub fn build(self, servers: &[KeyServerPublic]) -> Result<EncryptedObject> {
        let mut seen = HashSet::new();
        if let Some(dup) = servers.iter().find(|s| !seen.insert(s.id)) {
            return Err(AccessError::Config(format!("key server {} listed twice", dup.id)));
        }

        let content_key = EncryptionKey::generate();
        let shares = shamir::split(content_key.as_bytes(), self.threshold, servers.len())
            .map_err(|e| AccessError::Config(e.to_string()))?;

        let ephemeral = X25519StaticSecret::generate();
        let mut sealed_shares = Vec::with_capacity(servers.len());
        for (server, share) in servers.iter().zip(shares) {
            let share_key = derive_share_key(
                &ephemeral.diffie_hellman(&server.public_key),
                &self.binding,
                &server.id,
            );
            let nonce = EncryptionNonce::generate();
            let encrypted_share = share_key
                .encrypt(&share.value, &nonce, &[share.index])
                .map_err(|e| AccessError::Format(e.to_string()))?;
            sealed_shares.push(ServerShare {
                server_id: server.id,
                index: share.index,
                nonce,
                encrypted_share,
            });
        }

        let body_nonce = EncryptionNonce::generate();
        let body = content_key
            .encrypt(&self.plaintext, &body_nonce, &self.binding.to_bytes())
            .map_err(|e| AccessError::Format(e.to_string()))?;

        Ok(EncryptedObject {
            header: ObjectHeader {
                binding: self.binding,
                // split() bounds the threshold by the share count, at most 255.
                threshold: self.threshold as u8,
                ephemeral_public: ephemeral.public_key(),
                shares: sealed_shares,
                body_nonce,
            },
            body,
        })
    }
}
