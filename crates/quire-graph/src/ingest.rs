//! Ingestion of graph objects into a [`LedgerSnapshot`].
//!
//! This is the data-model boundary: payload fields are accepted in
//! snake_case or camelCase, numbers as JSON numbers or decimal strings,
//! and identifiers in any shape `ObjectId`'s deserializer understands.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use tracing::debug;

use quire_core::{
    AccountAddress, BlobHandle, Column, ColumnStatus, CreatorCap, FileMeta, Installment,
    LedgerBuilder, LedgerSnapshot, ObjectId, PaymentPolicy, Subscription,
    DEFAULT_MAX_FILES_PER_INSTALLMENT,
};

use crate::error::{GraphError, Result};
use crate::traits::{GraphObject, ObjectGraph, ObjectGraphExt, ObjectType};

/// Configuration for graph queries and snapshot validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Objects requested per page.
    pub page_size: usize,
    /// Upper bound on pages followed for one query.
    pub max_pages: usize,
    /// Installments listing more files than this are rejected.
    pub max_files_per_installment: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages: 1_000,
            max_files_per_installment: DEFAULT_MAX_FILES_PER_INSTALLMENT,
        }
    }
}

/// Builds ledger snapshots from an object graph.
#[derive(Debug, Clone, Default)]
pub struct SnapshotLoader {
    config: GraphConfig,
}

impl SnapshotLoader {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Query every snapshot type and assemble a validated snapshot.
    pub async fn load<G: ObjectGraph + ?Sized>(&self, graph: &G) -> Result<LedgerSnapshot> {
        let mut builder = LedgerBuilder::new(self.config.max_files_per_installment);
        let mut total = 0usize;

        for object_type in ObjectType::SNAPSHOT_TYPES.iter() {
            let objects = graph
                .collect_by_type(object_type, self.config.page_size, self.config.max_pages)
                .await?;
            total += objects.len();
            for object in &objects {
                builder = add_object(builder, object)?;
            }
        }

        debug!(objects = total, "ledger snapshot loaded");
        Ok(builder.build()?)
    }
}

/// Parse one object and add it to the builder.
pub fn add_object(builder: LedgerBuilder, object: &GraphObject) -> Result<LedgerBuilder> {
    Ok(match &object.type_tag {
        ObjectType::Column => builder.column(parse_column(object)?),
        ObjectType::Installment => builder.installment(parse_installment(object)?),
        ObjectType::File => builder.file(parse_file(object)?),
        ObjectType::CreatorCap => builder.creator_cap(parse_creator_cap(object)?),
        ObjectType::Subscription => builder.subscription(parse_subscription(object)?),
        ObjectType::PaymentPolicy => builder.payment_policy(parse_payment_policy(object)?),
        ObjectType::Other(_) => builder,
    })
}

fn payload<T: DeserializeOwned>(object: &GraphObject) -> Result<T> {
    serde_json::from_value(object.content.clone()).map_err(|e| malformed(object, e.to_string()))
}

fn malformed(object: &GraphObject, reason: impl Into<String>) -> GraphError {
    GraphError::Malformed {
        object_type: object.type_tag.to_string(),
        id: object.id,
        reason: reason.into(),
    }
}

/// Object owner from the graph envelope, falling back to an `owner` field.
fn owner_of(object: &GraphObject, from_payload: Option<AccountAddress>) -> Result<AccountAddress> {
    object
        .owner
        .or(from_payload)
        .ok_or_else(|| malformed(object, "missing owner"))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num {
        Int(u64),
        Text(String),
    }
    match Num::deserialize(deserializer)? {
        Num::Int(n) => Ok(n),
        Num::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num {
        Int(i64),
        Text(String),
    }
    match Num::deserialize(deserializer)? {
        Num::Int(n) => Ok(n),
        Num::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

#[derive(Deserialize)]
struct ColumnPayload {
    #[serde(alias = "creatorAddress", alias = "creator_address")]
    creator: AccountAddress,
    #[serde(alias = "paymentPolicy", alias = "payment_policy_id", alias = "payment_method")]
    payment_policy: ObjectId,
    #[serde(alias = "updateCadence", alias = "update_cadence", alias = "cadence_policy_id")]
    cadence_policy: ObjectId,
    status: ColumnStatus,
}

fn parse_column(object: &GraphObject) -> Result<Column> {
    let p: ColumnPayload = payload(object)?;
    Ok(Column {
        id: object.id,
        creator: p.creator,
        payment_policy_id: p.payment_policy,
        cadence_policy_id: p.cadence_policy,
        status: p.status,
    })
}

#[derive(Deserialize)]
struct InstallmentPayload {
    #[serde(alias = "columnId", alias = "column_id")]
    column: ObjectId,
    #[serde(alias = "seq", alias = "installmentNumber", deserialize_with = "lenient_u64")]
    sequence: u64,
    #[serde(default, alias = "isPublished", alias = "is_published")]
    published: bool,
    #[serde(default, alias = "fileIds", alias = "file_ids")]
    files: Vec<ObjectId>,
}

fn parse_installment(object: &GraphObject) -> Result<Installment> {
    let p: InstallmentPayload = payload(object)?;
    Ok(Installment {
        id: object.id,
        column_id: p.column,
        sequence: p.sequence,
        published: p.published,
        files: p.files,
    })
}

#[derive(Deserialize)]
struct FilePayload {
    #[serde(alias = "name")]
    title: String,
    #[serde(default, alias = "directoryId", alias = "directory_id")]
    directory: Option<ObjectId>,
    #[serde(default, alias = "blobId", alias = "blob_id", alias = "content")]
    blob: Option<String>,
    #[serde(default, alias = "createdAt", deserialize_with = "lenient_i64")]
    created_at: i64,
    #[serde(default, alias = "updatedAt", deserialize_with = "lenient_i64")]
    updated_at: i64,
}

fn parse_file(object: &GraphObject) -> Result<FileMeta> {
    let p: FilePayload = payload(object)?;
    Ok(FileMeta {
        id: object.id,
        title: p.title,
        directory_id: p.directory,
        blob: p.blob.and_then(BlobHandle::new),
        created_at_ms: p.created_at,
        updated_at_ms: p.updated_at,
    })
}

#[derive(Deserialize)]
struct PaymentPolicyPayload {
    #[serde(alias = "columnId", alias = "column_id")]
    column: ObjectId,
    #[serde(
        alias = "subscriptionPeriod",
        alias = "period_ms",
        deserialize_with = "lenient_i64"
    )]
    subscription_period: i64,
    #[serde(default, deserialize_with = "lenient_u64")]
    price: u64,
}

fn parse_payment_policy(object: &GraphObject) -> Result<PaymentPolicy> {
    let p: PaymentPolicyPayload = payload(object)?;
    if p.subscription_period <= 0 {
        return Err(malformed(object, "subscription period must be positive"));
    }
    Ok(PaymentPolicy {
        id: object.id,
        column_id: p.column,
        subscription_period_ms: p.subscription_period,
        price: p.price,
    })
}

#[derive(Deserialize)]
struct CreatorCapPayload {
    #[serde(default)]
    owner: Option<AccountAddress>,
    #[serde(alias = "columnId", alias = "column_id")]
    column: ObjectId,
}

fn parse_creator_cap(object: &GraphObject) -> Result<CreatorCap> {
    let p: CreatorCapPayload = payload(object)?;
    Ok(CreatorCap {
        id: object.id,
        owner: owner_of(object, p.owner)?,
        column_id: p.column,
    })
}

#[derive(Deserialize)]
struct SubscriptionPayload {
    #[serde(default)]
    owner: Option<AccountAddress>,
    #[serde(alias = "columnId", alias = "column_id")]
    column: ObjectId,
    #[serde(alias = "paymentPolicy", alias = "payment_policy_id", alias = "payment_method")]
    payment_policy: ObjectId,
    #[serde(
        alias = "start_ms",
        alias = "subStartTime",
        alias = "sub_start_time",
        deserialize_with = "lenient_i64"
    )]
    start: i64,
}

fn parse_subscription(object: &GraphObject) -> Result<Subscription> {
    let p: SubscriptionPayload = payload(object)?;
    Ok(Subscription {
        id: object.id,
        owner: owner_of(object, p.owner)?,
        column_id: p.column,
        payment_policy_id: p.payment_policy,
        start_ms: p.start,
    })
}
