//! # Quire Graph
//!
//! Boundary to the ledger's object graph. Quire consumes the graph as a
//! read-only, cursor-paginated query service and turns what it returns
//! into a validated [`LedgerSnapshot`](quire_core::LedgerSnapshot).
//!
//! ## Key Types
//!
//! - [`ObjectGraph`] - the async query trait a deployment implements
//! - [`ObjectGraphExt`] - pagination loops that never stop at a partial page
//! - [`MemoryGraph`] - in-memory graph for tests
//! - [`SnapshotLoader`] - ingestion into the data model
//!
//! ## Usage
//!
//! ```rust,no_run
//! use quire_graph::{MemoryGraph, SnapshotLoader};
//!
//! async fn example() {
//!     let graph = MemoryGraph::new();
//!     let ledger = SnapshotLoader::default().load(&graph).await.unwrap();
//!     assert!(ledger.is_empty());
//! }
//! ```

pub mod error;
pub mod ingest;
pub mod memory;
pub mod traits;

pub use error::{GraphError, Result};
pub use ingest::{add_object, GraphConfig, SnapshotLoader};
pub use memory::MemoryGraph;
pub use traits::{GraphObject, ObjectGraph, ObjectGraphExt, ObjectType, Page};
