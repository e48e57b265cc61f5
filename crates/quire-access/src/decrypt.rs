//! Local decryption of encrypted objects.
//!
//! Runs offline once key material is held. Every failure is an error;
//! authenticated decryption never yields plaintext from a tampered or
//! misbound object.

use tracing::debug;

use crate::crypto::EncryptionKey;
use crate::envelope::EncryptedObject;
use crate::error::{AccessError, Result};
use crate::keys::ObjectKeys;
use crate::shamir::{self, Share};

/// Opens encrypted objects with retrieved key material.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecryptionEngine;

impl DecryptionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decrypt `ciphertext` with keys authorized for its binding.
    ///
    /// A malformed object or one bound to a different file than `keys` is
    /// a format error. Keys that do not open enough shares are no access.
    pub fn decrypt(&self, ciphertext: &[u8], keys: &ObjectKeys) -> Result<Vec<u8>> {
        let object = EncryptedObject::from_bytes(ciphertext)?;
        let header = &object.header;

        if &header.binding != keys.binding() {
            return Err(AccessError::Format(format!(
                "object is bound to {} but keys were authorized for {}",
                header.binding,
                keys.binding()
            )));
        }

        let threshold = usize::from(header.threshold);
        let mut shares = Vec::with_capacity(threshold);
        let mut rejected = 0usize;
        for entry in &header.shares {
            if shares.len() == threshold {
                break;
            }
            let Some(key) = keys.get(&entry.server_id) else {
                continue;
            };
            match key.decrypt(&entry.encrypted_share, &entry.nonce, &[entry.index]) {
                Ok(value) => shares.push(Share {
                    index: entry.index,
                    value,
                }),
                Err(_) => {
                    debug!(server_id = %entry.server_id, "share did not open");
                    rejected += 1;
                }
            }
        }

        if shares.len() < threshold {
            return Err(AccessError::NoAccess(format!(
                "opened {} of {threshold} required shares ({rejected} rejected)",
                shares.len()
            )));
        }

        let content_key = shamir::combine(&shares)
            .map_err(|e| AccessError::Format(e.to_string()))
            .and_then(|bytes| {
                EncryptionKey::from_slice(&bytes)
                    .map_err(|e| AccessError::Format(e.to_string()))
            })?;

        content_key
            .decrypt(&object.body, &header.body_nonce, &header.binding.to_bytes())
            .map_err(|_| AccessError::Format("body failed authentication".into()))
    }
}
