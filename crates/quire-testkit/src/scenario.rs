//! End-to-end scenarios: a populated object graph, encrypted blobs on
//! mirrors, a key-server committee and a manual clock.
//!
//! Objects are named by strings (`"col-1"`, `"inst-3"`, `"file-7"`) and
//! identified by [`named_id`] of that name. The key servers evaluate
//! requests against the last [`Scenario::commit`]ted snapshot, so commit
//! after every change to the graph.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};

use quire::{Reader, ReaderConfig};
use quire_access::{
    CredentialConfig, CredentialManager, EncryptedObjectBuilder, KeyServerClient,
    KeyServerConfig,
};
use quire_core::{AccountAddress, BindingId, BlobHandle, Clock, LedgerSnapshot, ManualClock, ObjectId};
use quire_graph::{GraphObject, MemoryGraph, ObjectType, SnapshotLoader};
use quire_transport::{BlobRetriever, Mirror, RetrieverConfig};

use crate::fixtures::{named_id, CountingWallet, KeyNetwork, KeyServerMode, ScriptedMirror};

/// Scenario start time.
pub const START_MS: i64 = 1_700_000_000_000;

/// Subscription period of every payment policy in a scenario.
pub const PERIOD_MS: i64 = 30 * 24 * 3600 * 1000;

/// Application id credentials are issued for.
pub fn app_id() -> ObjectId {
    named_id("quire-test-app")
}

/// Handle under which a file's blob is stored.
pub fn blob_handle(file: &str) -> BlobHandle {
    BlobHandle::new(format!("blob-{file}")).expect("non-empty handle")
}

/// A complete test world.
pub struct Scenario {
    pub graph: Arc<MemoryGraph>,
    pub clock: Arc<ManualClock>,
    pub network: KeyNetwork,
    pub mirrors: Vec<Arc<ScriptedMirror>>,
    threshold: usize,
    objects: HashMap<ObjectId, GraphObject>,
}

impl Scenario {
    /// One key server per mode and `mirrors` mirrors, all serving.
    pub fn new(modes: &[KeyServerMode], mirrors: usize) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let empty = LedgerSnapshot::builder().build().expect("empty ledger is valid");
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let network = KeyNetwork::new(modes, app_id(), Arc::new(empty), dyn_clock);
        Self {
            graph: Arc::new(MemoryGraph::new()),
            clock,
            network,
            mirrors: (0..mirrors)
                .map(|i| ScriptedMirror::new(&format!("mirror-{i}")))
                .collect(),
            threshold: 2,
            objects: HashMap::new(),
        }
    }

    /// Five honest servers, threshold two, three mirrors.
    pub fn standard() -> Self {
        Self::new(&[KeyServerMode::Honest; 5], 3)
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger objects
    // ─────────────────────────────────────────────────────────────────────────

    /// A published column, its payment policy and the creator's capability.
    pub fn add_column(&mut self, column: &str, creator: &AccountAddress) -> &mut Self {
        let column_id = named_id(column);
        self.insert(object(
            column,
            ObjectType::Column,
            None,
            json!({
                "creator": creator,
                "paymentPolicy": named_id(&format!("{column}/policy")),
                "updateCadence": named_id(&format!("{column}/cadence")),
                "status": "published",
            }),
        ));
        self.insert(object(
            &format!("{column}/policy"),
            ObjectType::PaymentPolicy,
            None,
            json!({
                "column": column_id,
                "subscriptionPeriod": PERIOD_MS,
                "price": 1_000,
            }),
        ));
        self.insert(object(
            &format!("{column}/cap"),
            ObjectType::CreatorCap,
            Some(*creator),
            json!({ "column": column_id }),
        ));
        self
    }

    /// An installment whose files are encrypted and stored on every mirror.
    pub fn add_installment(
        &mut self,
        column: &str,
        installment: &str,
        sequence: u64,
        published: bool,
        files: &[(&str, &[u8])],
    ) -> &mut Self {
        let file_ids: Vec<ObjectId> = files.iter().map(|(name, _)| named_id(name)).collect();
        self.insert(object(
            installment,
            ObjectType::Installment,
            None,
            json!({
                "column": named_id(column),
                "sequence": sequence,
                "isPublished": published,
                "files": file_ids,
            }),
        ));
        for (name, plaintext) in files {
            self.add_file(column, name, plaintext);
        }
        self
    }

    /// Append a file that was never uploaded to an installment.
    pub fn add_file_without_blob(&mut self, installment: &str, file: &str) -> &mut Self {
        self.insert(object(file, ObjectType::File, None, json!({ "title": file })));
        self.edit(installment, |content| {
            if let Some(files) = content["files"].as_array_mut() {
                files.push(json!(named_id(file)));
            }
        });
        self
    }

    pub fn subscribe(
        &mut self,
        account: &AccountAddress,
        column: &str,
        subscription: &str,
        start_ms: i64,
    ) -> &mut Self {
        self.insert(object(
            subscription,
            ObjectType::Subscription,
            Some(*account),
            json!({
                "column": named_id(column),
                "paymentPolicy": named_id(&format!("{column}/policy")),
                "subStartTime": start_ms,
            }),
        ));
        self
    }

    pub fn set_published(&mut self, installment: &str, published: bool) -> &mut Self {
        self.edit(installment, |content| {
            content["isPublished"] = json!(published);
        });
        self
    }

    pub fn set_column_status(&mut self, column: &str, status: &str) -> &mut Self {
        self.edit(column, |content| {
            content["status"] = json!(status);
        });
        self
    }

    /// Serve `bytes` in place of `file`'s blob on every mirror.
    pub fn replace_blob(&mut self, file: &str, bytes: impl Into<Bytes>) -> &mut Self {
        let bytes = bytes.into();
        for mirror in &self.mirrors {
            mirror.put(&blob_handle(file), bytes.clone());
        }
        self
    }

    /// The stored blob of `file`.
    pub fn blob(&self, file: &str) -> Option<Bytes> {
        self.mirrors.first().and_then(|m| m.blob(&blob_handle(file)))
    }

    /// Load the graph into a snapshot and hand it to every key server.
    pub async fn commit(&self) -> Arc<LedgerSnapshot> {
        let ledger = Arc::new(
            SnapshotLoader::default()
                .load(self.graph.as_ref())
                .await
                .expect("scenario graph is valid"),
        );
        self.network.set_ledger(Arc::clone(&ledger));
        ledger
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────────

    pub fn key_client(&self) -> KeyServerClient {
        let config = KeyServerConfig {
            threshold: self.threshold,
            ..KeyServerConfig::default()
        };
        KeyServerClient::new(self.network.as_dyn(), config).expect("valid committee")
    }

    pub fn credentials(&self, wallet: Arc<CountingWallet>) -> CredentialManager {
        CredentialManager::new(CredentialConfig::new(app_id()), wallet, self.clock.clone())
    }

    /// A reader signing with `wallet`.
    pub fn reader(&self, wallet: Arc<CountingWallet>) -> Reader<MemoryGraph> {
        let mirrors: Vec<Arc<dyn Mirror>> = self
            .mirrors
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn Mirror>)
            .collect();
        Reader::new(
            ReaderConfig::default(),
            Arc::clone(&self.graph),
            Arc::new(self.credentials(wallet)),
            Arc::new(BlobRetriever::new(mirrors, RetrieverConfig::default())),
            Arc::new(self.key_client()),
            self.clock.clone(),
        )
    }

    /// Mirror calls across all mirrors.
    pub fn mirror_attempts(&self) -> usize {
        self.mirrors.iter().map(|m| m.attempts()).sum()
    }

    fn add_file(&mut self, column: &str, file: &str, plaintext: &[u8]) {
        let handle = blob_handle(file);
        self.insert(object(
            file,
            ObjectType::File,
            None,
            json!({
                "title": file,
                "blobId": handle.as_str(),
                "createdAt": START_MS,
                "updatedAt": START_MS,
            }),
        ));

        let binding = BindingId::new(named_id(column), named_id(file));
        let encrypted = EncryptedObjectBuilder::new(binding, plaintext.to_vec())
            .threshold(self.threshold)
            .build(&self.network.publics())
            .and_then(|object| object.to_bytes())
            .expect("encryption succeeds");
        let encrypted = Bytes::from(encrypted);
        for mirror in &self.mirrors {
            mirror.put(&handle, encrypted.clone());
        }
    }

    fn insert(&mut self, object: GraphObject) {
        self.graph.insert(object.clone());
        self.objects.insert(object.id, object);
    }

    fn edit(&mut self, name: &str, change: impl FnOnce(&mut Value)) {
        let id = named_id(name);
        let Some(mut object) = self.objects.get(&id).cloned() else {
            panic!("no object named {name}");
        };
        change(&mut object.content);
        self.insert(object);
    }
}

fn object(
    name: &str,
    type_tag: ObjectType,
    owner: Option<AccountAddress>,
    content: Value,
) -> GraphObject {
    GraphObject {
        id: named_id(name),
        type_tag,
        owner,
        content,
    }
}
