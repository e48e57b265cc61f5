//! ObjectGraph trait: the read-only, paginated query interface onto the
//! ledger's object store.
//!
//! Quire never writes to the graph. Implementations include an in-memory
//! graph for tests; production deployments wrap their indexer's API.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quire_core::{AccountAddress, ObjectId};

use crate::error::{GraphError, Result};

/// Type tag of a graph object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Column,
    Installment,
    File,
    CreatorCap,
    Subscription,
    PaymentPolicy,
    /// Anything Quire does not interpret.
    Other(String),
}

impl ObjectType {
    /// The types a ledger snapshot is assembled from.
    pub const SNAPSHOT_TYPES: [ObjectType; 6] = [
        ObjectType::Column,
        ObjectType::Installment,
        ObjectType::File,
        ObjectType::CreatorCap,
        ObjectType::Subscription,
        ObjectType::PaymentPolicy,
    ];
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectType::Column => f.write_str("Column"),
            ObjectType::Installment => f.write_str("Installment"),
            ObjectType::File => f.write_str("File"),
            ObjectType::CreatorCap => f.write_str("CreatorCap"),
            ObjectType::Subscription => f.write_str("Subscription"),
            ObjectType::PaymentPolicy => f.write_str("PaymentPolicy"),
            ObjectType::Other(tag) => f.write_str(tag),
        }
    }
}

/// One object as returned by the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphObject {
    pub id: ObjectId,
    pub type_tag: ObjectType,
    /// Address-owned objects carry their owner here.
    pub owner: Option<AccountAddress>,
    /// JSON-like payload.
    pub content: serde_json::Value,
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub objects: Vec<GraphObject>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Read-only, paginated query interface.
#[async_trait]
pub trait ObjectGraph: Send + Sync {
    /// One page of objects of a type, starting after `cursor`.
    async fn query_by_type(
        &self,
        object_type: &ObjectType,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page>;

    /// One page of the objects in `ids`, starting after `cursor`.
    ///
    /// Unknown ids are silently absent from the result.
    async fn query_by_ids(
        &self,
        ids: &[ObjectId],
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page>;
}

/// Pagination loops over any [`ObjectGraph`].
///
/// Pages are followed until `has_next_page` is false. A page that claims
/// more results without a cursor is an error, never a complete result.
pub trait ObjectGraphExt: ObjectGraph {
    /// Every object of a type.
    fn collect_by_type(
        &self,
        object_type: &ObjectType,
        page_size: usize,
        max_pages: usize,
    ) -> impl std::future::Future<Output = Result<Vec<GraphObject>>> + Send;

    /// Every object among `ids`.
    fn collect_by_ids(
        &self,
        ids: &[ObjectId],
        page_size: usize,
        max_pages: usize,
    ) -> impl std::future::Future<Output = Result<Vec<GraphObject>>> + Send;
}

impl<G: ObjectGraph + ?Sized> ObjectGraphExt for G {
    async fn collect_by_type(
        &self,
        object_type: &ObjectType,
        page_size: usize,
        max_pages: usize,
    ) -> Result<Vec<GraphObject>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..max_pages {
            let page = self
                .query_by_type(object_type, cursor.as_deref(), page_size)
                .await?;
            out.extend(page.objects);
            match next_cursor(page.has_next_page, page.end_cursor, cursor.as_deref())? {
                Some(next) => cursor = Some(next),
                None => return Ok(out),
            }
        }

        Err(GraphError::TooManyPages(max_pages))
    }

    async fn collect_by_ids(
        &self,
        ids: &[ObjectId],
        page_size: usize,
        max_pages: usize,
    ) -> Result<Vec<GraphObject>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..max_pages {
            let page = self.query_by_ids(ids, cursor.as_deref(), page_size).await?;
            out.extend(page.objects);
            match next_cursor(page.has_next_page, page.end_cursor, cursor.as_deref())? {
                Some(next) => cursor = Some(next),
                None => return Ok(out),
            }
        }

        Err(GraphError::TooManyPages(max_pages))
    }
}

/// Decide whether to fetch another page.
fn next_cursor(
    has_next_page: bool,
    end_cursor: Option<String>,
    previous: Option<&str>,
) -> Result<Option<String>> {
    if !has_next_page {
        return Ok(None);
    }
    match end_cursor {
        None => Err(GraphError::Pagination(
            "page reports more results but carries no end cursor".into(),
        )),
        Some(next) if Some(next.as_str()) == previous => Err(GraphError::Pagination(format!(
            "cursor {next} did not advance"
        ))),
        Some(next) => Ok(Some(next)),
    }
}
