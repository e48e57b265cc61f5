//! Proptest generators for property-based testing.

use proptest::prelude::*;

use quire_access::{
    derive_share_key, EncryptedObject, EncryptedObjectBuilder, KeyServerPublic, ObjectKeys,
    X25519StaticSecret,
};
use quire_core::{AccountAddress, BindingId, BlobHandle, ObjectId};

/// Generate a non-zero ObjectId.
pub fn object_id() -> impl Strategy<Value = ObjectId> {
    any::<[u8; 32]>()
        .prop_filter("zero address", |b| b.iter().any(|&x| x != 0))
        .prop_map(ObjectId)
}

/// Generate an AccountAddress.
pub fn account() -> impl Strategy<Value = AccountAddress> {
    any::<[u8; 32]>().prop_map(AccountAddress)
}

/// Generate a BindingId.
pub fn binding() -> impl Strategy<Value = BindingId> {
    (object_id(), object_id()).prop_map(|(column, file)| BindingId::new(column, file))
}

/// Generate a blob handle.
pub fn blob_handle() -> impl Strategy<Value = BlobHandle> {
    "[a-z0-9]{1,46}".prop_filter_map("blank handle", BlobHandle::new)
}

/// Generate content of at most `max_len` bytes.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate `(threshold, servers)` with `1 <= threshold <= servers <= max`.
pub fn quorum(max_servers: usize) -> impl Strategy<Value = (usize, usize)> {
    (1..=max_servers).prop_flat_map(|servers| (1..=servers, Just(servers)))
}

/// A key-server committee with known secrets.
pub struct Committee {
    pub secrets: Vec<X25519StaticSecret>,
    pub publics: Vec<KeyServerPublic>,
}

impl Committee {
    /// `size` servers with ids and secrets derived from their position.
    pub fn new(size: usize) -> Self {
        let secrets: Vec<X25519StaticSecret> = (0..size)
            .map(|i| X25519StaticSecret::from_bytes([i as u8 + 1; 32]))
            .collect();
        let publics = secrets
            .iter()
            .enumerate()
            .map(|(i, secret)| KeyServerPublic {
                id: ObjectId([0x40 + i as u8; 32]),
                public_key: secret.public_key(),
            })
            .collect();
        Self { secrets, publics }
    }

    /// The keys servers at `positions` would release for `object`.
    pub fn keys_for(&self, object: &EncryptedObject, positions: &[usize]) -> ObjectKeys {
        let header = &object.header;
        let mut keys = ObjectKeys::new(header.binding);
        for &i in positions {
            let shared = self.secrets[i].diffie_hellman(&header.ephemeral_public);
            let id = self.publics[i].id;
            keys.insert(id, derive_share_key(&shared, &header.binding, &id));
        }
        keys
    }

    /// Encrypt `plaintext` for this committee.
    pub fn encrypt(&self, binding: BindingId, plaintext: &[u8], threshold: usize) -> EncryptedObject {
        EncryptedObjectBuilder::new(binding, plaintext.to_vec())
            .threshold(threshold)
            .build(&self.publics)
            .expect("valid committee and threshold")
    }
}
