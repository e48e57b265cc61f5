//! # Quire Testkit
//!
//! Testing utilities for Quire.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a counting wallet, scripted mirrors and a simulated
//!   key-server committee, each recording how often it was called
//! - **Scenarios**: a populated object graph with encrypted blobs and a
//!   ready-to-use [`Reader`](quire::Reader)
//! - **Generators**: Proptest strategies for identifiers, plaintexts and
//!   quorum shapes
//!
//! ## Scenarios
//!
//! ```rust,no_run
//! use quire_testkit::{named_id, CountingWallet, Scenario};
//!
//! async fn example() {
//!     let creator = CountingWallet::named("creator");
//!     let mut scenario = Scenario::standard();
//!     scenario
//!         .add_column("col-1", &creator.address())
//!         .add_installment("col-1", "inst-3", 3, true, &[("file-7", b"chapter seven")]);
//!     scenario.commit().await;
//!
//!     let reader = scenario.reader(creator.clone());
//!     let text = reader
//!         .request_file(&creator.address(), &named_id("file-7"))
//!         .await
//!         .unwrap();
//!     assert_eq!(&text[..], b"chapter seven");
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod scenario;

pub use fixtures::{
    named_id, CountingWallet, KeyNetwork, KeyServerMode, MirrorOutcome, ScriptedMirror,
    SimKeyServer,
};
pub use generators::Committee;
pub use scenario::{app_id, blob_handle, Scenario, PERIOD_MS, START_MS};
