//! Authorization requests and the predicates key servers evaluate.
//!
//! There is one request shape per capability variant. Creator requests
//! name the file; subscriber requests are installment-scoped and never
//! carry a file id.

use std::fmt;

use serde::{Deserialize, Serialize};

use quire_core::{
    AccountAddress, BindingId, Capability, ColumnStatus, LedgerSnapshot, ObjectId, ValidationError,
};

/// The role a reader claims, and the capability object proving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
    Creator { cap_id: ObjectId },
    Subscriber { subscription_id: ObjectId },
}

impl From<&Capability> for AccessRole {
    fn from(capability: &Capability) -> Self {
        match capability {
            Capability::Creator(cap) => AccessRole::Creator { cap_id: cap.id },
            Capability::Subscriber(sub) => AccessRole::Subscriber {
                subscription_id: sub.id,
            },
        }
    }
}

/// Resource identifiers a request may need. Unused ones are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceIds {
    pub column_id: Option<ObjectId>,
    pub file_id: Option<ObjectId>,
    pub installment_id: Option<ObjectId>,
    pub payment_policy_id: Option<ObjectId>,
}

/// A request whose predicate a key server evaluates against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationRequest {
    Creator {
        cap_id: ObjectId,
        column_id: ObjectId,
        file_id: ObjectId,
    },
    Subscriber {
        subscription_id: ObjectId,
        column_id: ObjectId,
        payment_policy_id: ObjectId,
        installment_id: ObjectId,
    },
}

/// Why a predicate did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial(pub String);

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn deny<T>(reason: impl Into<String>) -> Result<T, Denial> {
    Err(Denial(reason.into()))
}

/// Build the request for `role` over `resources`.
///
/// Fields are checked capability first, then column, then the
/// role-specific ids, so the reported field is deterministic.
pub fn build(
    role: &AccessRole,
    resources: &ResourceIds,
) -> Result<AuthorizationRequest, ValidationError> {
    match *role {
        AccessRole::Creator { cap_id } => Ok(AuthorizationRequest::Creator {
            cap_id: require("cap_id", Some(cap_id))?,
            column_id: require("column_id", resources.column_id)?,
            file_id: require("file_id", resources.file_id)?,
        }),
        AccessRole::Subscriber { subscription_id } => Ok(AuthorizationRequest::Subscriber {
            subscription_id: require("subscription_id", Some(subscription_id))?,
            column_id: require("column_id", resources.column_id)?,
            payment_policy_id: require("payment_policy_id", resources.payment_policy_id)?,
            installment_id: require("installment_id", resources.installment_id)?,
        }),
    }
}

fn require(field: &'static str, id: Option<ObjectId>) -> Result<ObjectId, ValidationError> {
    match id {
        None => Err(ValidationError::missing(field)),
        Some(id) if id.is_zero() => Err(ValidationError::new(field, "zero address")),
        Some(id) => Ok(id),
    }
}

/// Parse a raw identifier, naming `field` on failure.
pub fn parse_id(field: &'static str, raw: &str) -> Result<ObjectId, ValidationError> {
    let id = raw
        .parse::<ObjectId>()
        .map_err(|e| ValidationError::new(field, e.to_string()))?;
    require(field, Some(id))
}

/// Pick the capability `account` reads `column_id` with.
///
/// A creator capability always wins. Otherwise the first subscription to
/// the column that is active at `now_ms`. Expired subscriptions never
/// qualify.
pub fn select_capability(
    ledger: &LedgerSnapshot,
    account: &AccountAddress,
    column_id: &ObjectId,
    now_ms: i64,
) -> Option<Capability> {
    if let Some(cap) = ledger
        .creator_caps_of(account)
        .into_iter()
        .find(|cap| &cap.column_id == column_id)
    {
        return Some(Capability::Creator(cap.clone()));
    }

    ledger
        .subscriptions_of(account)
        .into_iter()
        .filter(|sub| &sub.column_id == column_id)
        .find(|sub| {
            ledger
                .payment_policy(&sub.payment_policy_id)
                .is_some_and(|policy| sub.is_active(policy, now_ms))
        })
        .map(|sub| Capability::Subscriber(sub.clone()))
}

impl AuthorizationRequest {
    pub fn column_id(&self) -> ObjectId {
        match self {
            AuthorizationRequest::Creator { column_id, .. }
            | AuthorizationRequest::Subscriber { column_id, .. } => *column_id,
        }
    }

    pub fn is_creator(&self) -> bool {
        matches!(self, AuthorizationRequest::Creator { .. })
    }

    /// Whether this request may cover `binding` at all.
    ///
    /// Creator requests cover exactly one file; subscriber requests cover
    /// every file of their installment.
    pub fn covers(&self, binding: &BindingId) -> bool {
        match self {
            AuthorizationRequest::Creator {
                column_id, file_id, ..
            } => binding.column_id == *column_id && binding.file_id == *file_id,
            AuthorizationRequest::Subscriber { column_id, .. } => binding.column_id == *column_id,
        }
    }

    /// Evaluate the predicate for `binding` on behalf of `sender`.
    pub fn verify(
        &self,
        binding: &BindingId,
        sender: &AccountAddress,
        ledger: &LedgerSnapshot,
        now_ms: i64,
    ) -> Result<(), Denial> {
        match *self {
            AuthorizationRequest::Creator {
                cap_id,
                column_id,
                file_id,
            } => {
                let Some(cap) = ledger.creator_cap(&cap_id) else {
                    return deny(format!("creator capability {cap_id} does not exist"));
                };
                if &cap.owner != sender {
                    return deny("creator capability is not owned by the sender");
                }
                if cap.column_id != column_id {
                    return deny("creator capability does not control this column");
                }
                if ledger.column(&column_id).is_none() {
                    return deny(format!("column {column_id} does not exist"));
                }
                match ledger.installment_of_file(&file_id) {
                    Some(inst) if inst.column_id == column_id => {}
                    _ => return deny("file does not belong to this column"),
                }
                if binding.column_id != column_id || binding.file_id != file_id {
                    return deny("object is bound to a different column or file");
                }
                Ok(())
            }
            AuthorizationRequest::Subscriber {
                subscription_id,
                column_id,
                payment_policy_id,
                installment_id,
            } => {
                let Some(sub) = ledger.subscription(&subscription_id) else {
                    return deny(format!("subscription {subscription_id} does not exist"));
                };
                if &sub.owner != sender {
                    return deny("subscription is not owned by the sender");
                }
                if sub.column_id != column_id {
                    return deny("subscription is for a different column");
                }
                if sub.payment_policy_id != payment_policy_id {
                    return deny("subscription uses a different payment policy");
                }
                let Some(policy) = ledger.payment_policy(&payment_policy_id) else {
                    return deny(format!("payment policy {payment_policy_id} does not exist"));
                };
                if policy.column_id != column_id {
                    return deny("payment policy belongs to a different column");
                }
                if !sub.is_active(policy, now_ms) {
                    return deny("subscription has expired");
                }
                let Some(column) = ledger.column(&column_id) else {
                    return deny(format!("column {column_id} does not exist"));
                };
                if column.status == ColumnStatus::Unpublished {
                    return deny("column is not published");
                }
                let Some(inst) = ledger.installment(&installment_id) else {
                    return deny(format!("installment {installment_id} does not exist"));
                };
                if inst.column_id != column_id {
                    return deny("installment belongs to a different column");
                }
                if !inst.published {
                    return deny("installment is not published");
                }
                if binding.column_id != column_id || !inst.contains(&binding.file_id) {
                    return deny("object is not part of this installment");
                }
                Ok(())
            }
        }
    }
}
