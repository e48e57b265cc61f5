//! Strong identifier types.
//!
//! Identifiers reach Quire in several shapes: bare hex strings with or
//! without `0x`, short addresses, and JSON objects wrapping the id
//! (`{"id": "0x.."}` or `{"id": {"id": "0x.."}}`). All of them are parsed
//! by [`parse_address`] exactly once, when they cross into the data model.

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::Ed25519PublicKey;
use crate::error::IdError;

/// Number of hex digits in a full address.
const ADDRESS_HEX_LEN: usize = 64;

/// Parse a textual address into 32 bytes.
///
/// Accepts an optional `0x` prefix and left-pads short addresses with zeros.
pub fn parse_address(raw: &str) -> Result<[u8; 32], IdError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(IdError::Empty);
    }
    if digits.len() > ADDRESS_HEX_LEN {
        return Err(IdError::TooLong(digits.len()));
    }
    if let Some(c) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(IdError::InvalidChar(c));
    }

    let padded = format!("{:0>width$}", digits, width = ADDRESS_HEX_LEN);
    let mut out = [0u8; 32];
    hex::decode_to_slice(padded, &mut out).map_err(|_| IdError::InvalidChar('?'))?;
    Ok(out)
}

/// Walk a JSON value down to the address it carries.
fn address_from_json(value: &serde_json::Value) -> Result<[u8; 32], IdError> {
    match value {
        serde_json::Value::String(s) => parse_address(s),
        serde_json::Value::Object(map) => match map.get("id") {
            Some(inner) => address_from_json(inner),
            None => Err(IdError::UnsupportedShape("object without `id`".into())),
        },
        serde_json::Value::Null => Err(IdError::Empty),
        other => Err(IdError::UnsupportedShape(format!("{other}"))),
    }
}

macro_rules! address_type {
    ($(#[$meta:meta])* $name:ident, $debug:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Full `0x`-prefixed hex form.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Normalize an identifier arriving from the object graph.
            pub fn from_json(value: &serde_json::Value) -> Result<Self, IdError> {
                address_from_json(value).map(Self)
            }

            /// Whether this is the all-zero address.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            /// The zero address.
            pub const ZERO: Self = Self([0u8; 32]);
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_address(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($debug, "({}..)"), &hex::encode(self.0)[..12])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(AddressVisitor).map(Self)
            }
        }
    };
}

address_type!(
    /// A 32-byte object identifier on the ledger (column, installment, file,
    /// capability, subscription, payment policy, key server, application).
    ObjectId,
    "ObjectId"
);

address_type!(
    /// A 32-byte account identity, derived from the account's Ed25519 key.
    AccountAddress,
    "Account"
);

impl AccountAddress {
    /// Derive the address owned by an Ed25519 public key.
    pub fn from_public_key(public_key: &Ed25519PublicKey) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("quire-v0-account-address");
        hasher.update(public_key.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

/// Accepts a string, or a map whose `id` entry (possibly nested) is one.
struct AddressVisitor;

impl<'de> Visitor<'de> for AddressVisitor {
    type Value = [u8; 32];

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an address string or an object with an `id` field")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_address(v).map_err(E::custom)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut found = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == "id" && found.is_none() {
                let inner: ObjectId = map.next_value()?;
                found = Some(inner.0);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        found.ok_or_else(|| de::Error::missing_field("id"))
    }
}

/// The value a blob's key material is bound to: the column it belongs to
/// and the file it holds.
///
/// Key servers derive key shares for this exact value and the decryption
/// engine refuses a ciphertext whose header names a different one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId {
    pub column_id: ObjectId,
    pub file_id: ObjectId,
}

impl BindingId {
    pub const fn new(column_id: ObjectId, file_id: ObjectId) -> Self {
        Self { column_id, file_id }
    }

    /// 64-byte encoding: column || file.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.column_id.0);
        out[32..].copy_from_slice(&self.file_id.0);
        out
    }

    /// Parse the 64-byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        let column: [u8; 32] = bytes[..32].try_into().ok()?;
        let file: [u8; 32] = bytes[32..].try_into().ok()?;
        Some(Self::new(ObjectId(column), ObjectId(file)))
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.column_id, self.file_id)
    }
}

/// Opaque content-address locator for an encrypted blob on a storage mirror.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
    /// Wrap a locator. Blank locators are rejected.
    pub fn new(handle: impl Into<String>) -> Option<Self> {
        let handle = handle.into();
        let trimmed = handle.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
