//! In-memory implementation of the ObjectGraph trait.
//!
//! Primarily for testing. Cursors are opaque stringified offsets and the
//! page size can be forced down to exercise pagination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use quire_core::ObjectId;

use crate::error::{GraphError, Result};
use crate::traits::{GraphObject, ObjectGraph, ObjectType, Page};

/// In-memory object graph.
///
/// Objects are returned in insertion order. Thread-safe via RwLock.
pub struct MemoryGraph {
    objects: RwLock<Vec<GraphObject>>,
    max_page_size: usize,
    queries: AtomicUsize,
}

impl MemoryGraph {
    /// Create an empty graph with no page-size cap beyond the caller's limit.
    pub fn new() -> Self {
        Self::with_max_page_size(usize::MAX)
    }

    /// Create an empty graph that never returns more than `max` objects per page.
    pub fn with_max_page_size(max: usize) -> Self {
        Self {
            objects: RwLock::new(Vec::new()),
            max_page_size: max.max(1),
            queries: AtomicUsize::new(0),
        }
    }

    /// Add or replace an object.
    pub fn insert(&self, object: GraphObject) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        match objects.iter_mut().find(|o| o.id == object.id) {
            Some(existing) => *existing = object,
            None => objects.push(object),
        }
    }

    /// Remove an object.
    pub fn remove(&self, id: &ObjectId) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.retain(|o| &o.id != id);
    }

    /// Number of page queries served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn page_of(&self, matching: Vec<GraphObject>, cursor: Option<&str>, limit: usize) -> Result<Page> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let start = match cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| GraphError::Pagination(format!("unknown cursor {c:?}")))?,
        };
        let size = limit.clamp(1, self.max_page_size);
        let end = start.saturating_add(size).min(matching.len());
        let objects = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let has_next_page = end < matching.len();

        Ok(Page {
            objects,
            has_next_page,
            end_cursor: has_next_page.then(|| end.to_string()),
        })
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectGraph for MemoryGraph {
    async fn query_by_type(
        &self,
        object_type: &ObjectType,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page> {
        let matching: Vec<GraphObject> = {
            let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
            objects
                .iter()
                .filter(|o| &o.type_tag == object_type)
                .cloned()
                .collect()
        };
        self.page_of(matching, cursor, limit)
    }

    async fn query_by_ids(
        &self,
        ids: &[ObjectId],
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page> {
        let matching: Vec<GraphObject> = {
            let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
            ids.iter()
                .filter_map(|id| objects.iter().find(|o| &o.id == id).cloned())
                .collect()
        };
        self.page_of(matching, cursor, limit)
    }
}
