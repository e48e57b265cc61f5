//! Indexed, read-only snapshot of the ledger objects Quire reasons about.
//!
//! Readers use it to pick a capability and resolve a file to its
//! installment and column. Key servers use it to evaluate authorization
//! predicates.

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::model::{
    Column, CreatorCap, FileMeta, Installment, PaymentPolicy, ResolvedFile, Subscription,
};
use crate::types::{AccountAddress, ObjectId};

/// Default upper bound on files per installment.
pub const DEFAULT_MAX_FILES_PER_INSTALLMENT: usize = 7;

/// Immutable view over columns, installments, files and capabilities.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    columns: HashMap<ObjectId, Column>,
    installments: HashMap<ObjectId, Installment>,
    files: HashMap<ObjectId, FileMeta>,
    creator_caps: HashMap<ObjectId, CreatorCap>,
    subscriptions: HashMap<ObjectId, Subscription>,
    payment_policies: HashMap<ObjectId, PaymentPolicy>,

    /// Index: file -> installment listing it.
    installment_by_file: HashMap<ObjectId, ObjectId>,
}

impl LedgerSnapshot {
    /// Start building a snapshot.
    pub fn builder() -> LedgerBuilder {
        LedgerBuilder::new(DEFAULT_MAX_FILES_PER_INSTALLMENT)
    }

    pub fn column(&self, id: &ObjectId) -> Option<&Column> {
        self.columns.get(id)
    }

    pub fn installment(&self, id: &ObjectId) -> Option<&Installment> {
        self.installments.get(id)
    }

    pub fn file(&self, id: &ObjectId) -> Option<&FileMeta> {
        self.files.get(id)
    }

    pub fn creator_cap(&self, id: &ObjectId) -> Option<&CreatorCap> {
        self.creator_caps.get(id)
    }

    pub fn subscription(&self, id: &ObjectId) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn payment_policy(&self, id: &ObjectId) -> Option<&PaymentPolicy> {
        self.payment_policies.get(id)
    }

    /// The installment that lists a file, if any.
    pub fn installment_of_file(&self, file_id: &ObjectId) -> Option<&Installment> {
        self.installment_by_file
            .get(file_id)
            .and_then(|id| self.installments.get(id))
    }

    /// Creator capabilities owned by an account.
    pub fn creator_caps_of(&self, owner: &AccountAddress) -> Vec<&CreatorCap> {
        let mut caps: Vec<_> = self
            .creator_caps
            .values()
            .filter(|cap| &cap.owner == owner)
            .collect();
        caps.sort_by_key(|cap| cap.id);
        caps
    }

    /// Subscriptions owned by an account.
    pub fn subscriptions_of(&self, owner: &AccountAddress) -> Vec<&Subscription> {
        let mut subs: Vec<_> = self
            .subscriptions
            .values()
            .filter(|sub| &sub.owner == owner)
            .collect();
        subs.sort_by_key(|sub| sub.id);
        subs
    }

    /// Installments of a column ordered by sequence number.
    pub fn installments_of(&self, column_id: &ObjectId) -> Vec<&Installment> {
        let mut list: Vec<_> = self
            .installments
            .values()
            .filter(|inst| &inst.column_id == column_id)
            .collect();
        list.sort_by_key(|inst| inst.sequence);
        list
    }

    /// Resolve a file to its installment and column.
    ///
    /// Returns `None` when any link in the chain is missing.
    pub fn resolve_file(&self, file_id: &ObjectId) -> Option<ResolvedFile> {
        let file = self.files.get(file_id)?;
        let installment = self.installment_of_file(file_id)?;
        let column = self.columns.get(&installment.column_id)?;
        Some(ResolvedFile {
            file: file.clone(),
            installment: installment.clone(),
            column: column.clone(),
        })
    }

    /// Whether the snapshot holds no objects at all.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
            && self.installments.is_empty()
            && self.files.is_empty()
            && self.creator_caps.is_empty()
            && self.subscriptions.is_empty()
            && self.payment_policies.is_empty()
    }
}

/// Collects ledger objects and checks installment invariants on `build`.
#[derive(Debug)]
pub struct LedgerBuilder {
    max_files_per_installment: usize,
    snapshot: LedgerSnapshot,
}

impl LedgerBuilder {
    pub fn new(max_files_per_installment: usize) -> Self {
        Self {
            max_files_per_installment,
            snapshot: LedgerSnapshot::default(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.snapshot.columns.insert(column.id, column);
        self
    }

    pub fn installment(mut self, installment: Installment) -> Self {
        self.snapshot.installments.insert(installment.id, installment);
        self
    }

    pub fn file(mut self, file: FileMeta) -> Self {
        self.snapshot.files.insert(file.id, file);
        self
    }

    pub fn creator_cap(mut self, cap: CreatorCap) -> Self {
        self.snapshot.creator_caps.insert(cap.id, cap);
        self
    }

    pub fn subscription(mut self, subscription: Subscription) -> Self {
        self.snapshot
            .subscriptions
            .insert(subscription.id, subscription);
        self
    }

    pub fn payment_policy(mut self, policy: PaymentPolicy) -> Self {
        self.snapshot.payment_policies.insert(policy.id, policy);
        self
    }

    /// Validate installments and build the indexes.
    pub fn build(mut self) -> Result<LedgerSnapshot> {
        let mut sequences: HashMap<(ObjectId, u64), ObjectId> = HashMap::new();
        let mut by_file = HashMap::new();

        let mut installments: Vec<_> = self.snapshot.installments.values().collect();
        installments.sort_by_key(|inst| inst.id);

        for inst in installments {
            if inst.files.len() > self.max_files_per_installment {
                return Err(CoreError::InstallmentTooLarge {
                    installment: inst.id,
                    files: inst.files.len(),
                    max: self.max_files_per_installment,
                });
            }

            if sequences
                .insert((inst.column_id, inst.sequence), inst.id)
                .is_some()
            {
                return Err(CoreError::DuplicateSequence {
                    column: inst.column_id,
                    sequence: inst.sequence,
                });
            }

            for file_id in &inst.files {
                if by_file.insert(*file_id, inst.id).is_some() {
                    return Err(CoreError::FileInMultipleInstallments(*file_id));
                }
            }
        }

        self.snapshot.installment_by_file = by_file;
        Ok(self.snapshot)
    }
}
