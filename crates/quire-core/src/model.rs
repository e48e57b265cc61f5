//! The column / installment / file data model.
//!
//! These are read-only views of ledger objects. Quire never mutates or
//! persists them; they are rebuilt from the object graph on demand.

use serde::{Deserialize, Serialize};

use crate::types::{AccountAddress, BindingId, BlobHandle, ObjectId};

/// Lifecycle status of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnStatus {
    Unpublished,
    Published,
    Withdrawn,
}

/// A subscribable content series with one creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: ObjectId,
    pub creator: AccountAddress,
    pub payment_policy_id: ObjectId,
    pub cadence_policy_id: ObjectId,
    pub status: ColumnStatus,
}

/// A numbered grouping of files within a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installment {
    pub id: ObjectId,
    pub column_id: ObjectId,
    /// Unique and increasing within the column.
    pub sequence: u64,
    pub published: bool,
    /// Files in display order.
    pub files: Vec<ObjectId>,
}

impl Installment {
    pub fn contains(&self, file_id: &ObjectId) -> bool {
        self.files.contains(file_id)
    }
}

/// File metadata. The encrypted content lives on storage mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub id: ObjectId,
    pub title: String,
    pub directory_id: Option<ObjectId>,
    /// Absent for files that were never uploaded.
    pub blob: Option<BlobHandle>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Subscription terms for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPolicy {
    pub id: ObjectId,
    pub column_id: ObjectId,
    pub subscription_period_ms: i64,
    /// Carried through, never interpreted here.
    pub price: u64,
}

/// Proof of control over a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorCap {
    pub id: ObjectId,
    pub owner: AccountAddress,
    pub column_id: ObjectId,
}

/// A paid subscription to a column under a specific payment policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: ObjectId,
    pub owner: AccountAddress,
    pub column_id: ObjectId,
    pub payment_policy_id: ObjectId,
    pub start_ms: i64,
}

impl Subscription {
    /// When the subscription stops granting access.
    pub fn expires_at(&self, policy: &PaymentPolicy) -> i64 {
        self.start_ms.saturating_add(policy.subscription_period_ms)
    }

    /// Active strictly before `start + period`; the boundary instant is expired.
    pub fn is_active(&self, policy: &PaymentPolicy, now_ms: i64) -> bool {
        now_ms < self.expires_at(policy)
    }
}

/// The role a reader proves for one decryption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Creator(CreatorCap),
    Subscriber(Subscription),
}

impl Capability {
    /// The capability object's id.
    pub fn id(&self) -> ObjectId {
        match self {
            Capability::Creator(cap) => cap.id,
            Capability::Subscriber(sub) => sub.id,
        }
    }

    /// The column this capability covers.
    pub fn column_id(&self) -> ObjectId {
        match self {
            Capability::Creator(cap) => cap.column_id,
            Capability::Subscriber(sub) => sub.column_id,
        }
    }

    pub fn is_creator(&self) -> bool {
        matches!(self, Capability::Creator(_))
    }
}

/// A file resolved against its installment and column.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub file: FileMeta,
    pub installment: Installment,
    pub column: Column,
}

impl ResolvedFile {
    pub fn binding(&self) -> BindingId {
        BindingId::new(self.column.id, self.file.id)
    }
}
