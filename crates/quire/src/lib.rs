//! # Quire
//!
//! Subscription-gated reading of encrypted content. Ask for a file on
//! behalf of an account; get its plaintext, or a precise reason why not.
//!
//! ## Overview
//!
//! A file belongs to an installment of a column. Files are stored
//! encrypted on content-addressed mirrors, and their keys are held by a
//! committee of independent key servers. Reading a file:
//!
//! 1. **Capability**: a creator capability over the column, or an active
//!    subscription to it. Without one the request fails before any network
//!    call
//! 2. **Credential**: the wallet signs a short-lived session credential
//!    once; later requests reuse it until it expires
//! 3. **Blob**: fetched from the first mirror that serves it
//! 4. **Keys**: a threshold of key servers evaluate the authorization
//!    request against the ledger and release key material
//! 5. **Plaintext**: decrypted locally and cached for the account
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quire::{Reader, ReaderConfig};
//! use quire::graph::MemoryGraph;
//!
//! async fn example(
//!     graph: Arc<MemoryGraph>,
//!     credentials: Arc<quire::access::CredentialManager>,
//!     retriever: Arc<quire::transport::BlobRetriever>,
//!     keys: Arc<quire::access::KeyServerClient>,
//!     account: quire::core::AccountAddress,
//!     file_id: quire::core::ObjectId,
//! ) {
//!     let clock = Arc::new(quire::core::SystemClock);
//!     let reader = Reader::new(ReaderConfig::default(), graph, credentials, retriever, keys, clock);
//!
//!     match reader.request_file(&account, &file_id).await {
//!         Ok(text) => println!("{} bytes", text.len()),
//!         Err(e) => println!("{}", e.user_message()),
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `quire::core` - identifiers, data model, ledger snapshot
//! - `quire::graph` - object graph boundary
//! - `quire::access` - credentials, authorization, key retrieval, decryption
//! - `quire::transport` - mirrors and HTTP transports

mod cache;
pub mod error;
pub mod reader;

pub use error::{ReaderError, Result};
pub use reader::{InstallmentContent, Reader, ReaderConfig};

pub use quire_access as access;
pub use quire_core as core;
pub use quire_graph as graph;
pub use quire_transport as transport;
