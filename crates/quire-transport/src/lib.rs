//! # Quire Transport
//!
//! Network edges of the pipeline.
//!
//! ## Key Types
//!
//! - [`Mirror`] - a storage mirror serving blobs by handle
//! - [`BlobRetriever`] - ordered failover across mirrors, per-mirror timeout,
//!   concurrent fan-out across blobs, abortable fetches
//! - [`HttpMirror`] / [`HttpKeyServer`] - reqwest-backed implementations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quire_transport::{BlobRetriever, HttpMirror, Mirror, RetrieverConfig};
//!
//! let mirrors: Vec<Arc<dyn Mirror>> = vec![
//!     Arc::new(HttpMirror::new("https://mirror-a.example")),
//!     Arc::new(HttpMirror::new("https://mirror-b.example")),
//! ];
//! let retriever = BlobRetriever::new(mirrors, RetrieverConfig::default());
//! // let bytes = retriever.fetch(&handle).await?;
//! ```

pub mod error;
pub mod http;
pub mod retriever;

pub use error::{FetchError, MirrorError, Result};
pub use http::{HttpKeyServer, HttpMirror};
pub use retriever::{BlobRetriever, Mirror, RetrieverConfig};
