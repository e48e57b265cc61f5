//! The non-submitted authorization transaction.
//!
//! A key request carries one of these as canonical CBOR. It is never
//! executed on the ledger: key servers decode it, check it was signed by
//! the session key, and evaluate each embedded check against their own
//! view of the ledger.
//!
//! ## Encoding
//!
//! ```text
//! tx    = { 0: version, 1: sender(32), 2: app_id(32), 3: [check, ...] }
//! check = { 0: binding(64), 1: ephemeral_public(32), 2: kind, 3..7: ids }
//!   kind 0 (creator):    3: cap_id, 4: column_id, 5: file_id
//!   kind 1 (subscriber): 3: subscription_id, 4: column_id,
//!                        6: payment_policy_id, 7: installment_id
//! ```

use ciborium::value::Value;

use quire_core::canonical::{canonical_cbor, decode_canonical, key, CborMap};
use quire_core::{AccountAddress, BindingId, CoreError, ObjectId, Result};

use crate::crypto::X25519PublicKey;
use crate::policy::AuthorizationRequest;

/// Encoding version.
pub const TX_VERSION: u64 = 1;

const KIND_CREATOR: u64 = 0;
const KIND_SUBSCRIBER: u64 = 1;

/// One object the sender asks keys for, and the request authorizing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCheck {
    pub binding: BindingId,
    /// The object header's ephemeral key, which key servers derive from.
    pub ephemeral_public: X25519PublicKey,
    pub request: AuthorizationRequest,
}

/// A batch of checks, signed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationTx {
    pub sender: AccountAddress,
    pub app_id: ObjectId,
    pub checks: Vec<AccessCheck>,
}

impl AuthorizationTx {
    /// Canonical CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let checks = self.checks.iter().map(encode_check).collect();
        let value = Value::Map(vec![
            (key(0), Value::Integer(TX_VERSION.into())),
            (key(1), Value::Bytes(self.sender.as_bytes().to_vec())),
            (key(2), Value::Bytes(self.app_id.as_bytes().to_vec())),
            (key(3), Value::Array(checks)),
        ]);
        canonical_cbor(&value)
    }

    /// Decode bytes that must be canonical.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value = decode_canonical(bytes)?;
        let map = CborMap::new(&value, "authorization tx")?;

        let version = map.uint(0, "version")?;
        if version != TX_VERSION {
            return Err(CoreError::DecodingError(format!(
                "unsupported tx version {version}"
            )));
        }

        let checks = map
            .array(3, "checks")?
            .iter()
            .map(decode_check)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sender: AccountAddress(map.fixed(1, "sender")?),
            app_id: ObjectId(map.fixed(2, "app_id")?),
            checks,
        })
    }
}

fn id_value(id: &ObjectId) -> Value {
    Value::Bytes(id.as_bytes().to_vec())
}

fn encode_check(check: &AccessCheck) -> Value {
    let mut entries = vec![
        (key(0), Value::Bytes(check.binding.to_bytes().to_vec())),
        (key(1), Value::Bytes(check.ephemeral_public.as_bytes().to_vec())),
    ];
    match &check.request {
        AuthorizationRequest::Creator {
            cap_id,
            column_id,
            file_id,
        } => entries.extend([
            (key(2), Value::Integer(KIND_CREATOR.into())),
            (key(3), id_value(cap_id)),
            (key(4), id_value(column_id)),
            (key(5), id_value(file_id)),
        ]),
        AuthorizationRequest::Subscriber {
            subscription_id,
            column_id,
            payment_policy_id,
            installment_id,
        } => entries.extend([
            (key(2), Value::Integer(KIND_SUBSCRIBER.into())),
            (key(3), id_value(subscription_id)),
            (key(4), id_value(column_id)),
            (key(6), id_value(payment_policy_id)),
            (key(7), id_value(installment_id)),
        ]),
    }
    Value::Map(entries)
}

fn decode_check(value: &Value) -> Result<AccessCheck> {
    let map = CborMap::new(value, "access check")?;

    let binding = BindingId::from_bytes(map.bytes(0, "binding")?)
        .ok_or_else(|| CoreError::DecodingError("binding: expected 64 bytes".into()))?;
    let ephemeral_public = X25519PublicKey::from_bytes(map.fixed(1, "ephemeral_public")?);
    let id = |k: u64, name: &str| map.fixed(k, name).map(ObjectId);

    let request = match map.uint(2, "kind")? {
        KIND_CREATOR => AuthorizationRequest::Creator {
            cap_id: id(3, "cap_id")?,
            column_id: id(4, "column_id")?,
            file_id: id(5, "file_id")?,
        },
        KIND_SUBSCRIBER => {
            if map.get(5).is_some() {
                return Err(CoreError::DecodingError(
                    "subscriber check must not name a file".into(),
                ));
            }
            AuthorizationRequest::Subscriber {
                subscription_id: id(3, "subscription_id")?,
                column_id: id(4, "column_id")?,
                payment_policy_id: id(6, "payment_policy_id")?,
                installment_id: id(7, "installment_id")?,
            }
        }
        other => {
            return Err(CoreError::DecodingError(format!(
                "unknown check kind {other}"
            )))
        }
    };

    Ok(AccessCheck {
        binding,
        ephemeral_public,
        request,
    })
}
