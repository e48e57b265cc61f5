//! Test doubles for the pipeline's collaborators.
//!
//! Every double counts how often it was used, so tests can assert that a
//! request failed before reaching the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use quire_access::{
    FetchKeyRequest, FetchKeyResponse, KeyServer, KeyServerError, KeyServerPublic,
    LocalKeyServer, SignError, WalletSignature, WalletSigner, X25519StaticSecret,
};
use quire_core::{AccountAddress, BlobHandle, Clock, Keypair, LedgerSnapshot, ObjectId};
use quire_transport::{Mirror, MirrorError};

/// Deterministic identifier for a human-readable name.
///
/// `named_id("col-1")` is the same in every test run.
pub fn named_id(name: &str) -> ObjectId {
    ObjectId(blake3::derive_key("quire-testkit named id", name.as_bytes()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// Wallet
// ─────────────────────────────────────────────────────────────────────────────

/// A wallet that signs every challenge and counts the prompts.
pub struct CountingWallet {
    keypair: Keypair,
    prompts: AtomicUsize,
    declining: AtomicBool,
}

impl CountingWallet {
    /// Wallet whose key is derived from `name`.
    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            keypair: Keypair::from_seed(named_id(name).as_bytes()),
            prompts: AtomicUsize::new(0),
            declining: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> AccountAddress {
        self.keypair.address()
    }

    /// Signature prompts shown so far, declined ones included.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Make the owner decline (or accept) subsequent prompts.
    pub fn set_declining(&self, declining: bool) {
        self.declining.store(declining, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletSigner for CountingWallet {
    fn account(&self) -> AccountAddress {
        self.keypair.address()
    }

    async fn sign(&self, message: &[u8]) -> Result<WalletSignature, SignError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.declining.load(Ordering::SeqCst) {
            return Err(SignError::Declined);
        }
        Ok(WalletSignature {
            public_key: self.keypair.public_key(),
            signature: self.keypair.sign(message),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mirrors
// ─────────────────────────────────────────────────────────────────────────────

/// What a scripted mirror does on one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Serve the stored blob, or 404 if none is stored.
    Serve,
    Fail(u16),
    /// Never answer.
    Hang,
}

/// A mirror whose answers are scripted call by call.
///
/// Queued outcomes are consumed one per call; once the queue is empty the
/// default outcome applies.
pub struct ScriptedMirror {
    name: String,
    blobs: Mutex<HashMap<String, Bytes>>,
    script: Mutex<VecDeque<MirrorOutcome>>,
    default: Mutex<MirrorOutcome>,
    attempts: AtomicUsize,
}

impl ScriptedMirror {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            blobs: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(MirrorOutcome::Serve),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn put(&self, handle: &BlobHandle, bytes: impl Into<Bytes>) {
        lock(&self.blobs).insert(handle.as_str().to_string(), bytes.into());
    }

    pub fn blob(&self, handle: &BlobHandle) -> Option<Bytes> {
        lock(&self.blobs).get(handle.as_str()).cloned()
    }

    /// Queue outcomes for the next calls.
    pub fn script(&self, outcomes: impl IntoIterator<Item = MirrorOutcome>) {
        lock(&self.script).extend(outcomes);
    }

    pub fn set_default(&self, outcome: MirrorOutcome) {
        *lock(&self.default) = outcome;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MirrorOutcome {
        let queued = lock(&self.script).pop_front();
        queued.unwrap_or_else(|| *lock(&self.default))
    }
}

#[async_trait]
impl Mirror for ScriptedMirror {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, handle: &BlobHandle) -> Result<Bytes, MirrorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.next_outcome() {
            MirrorOutcome::Serve => self.blob(handle).ok_or(MirrorError::Status(404)),
            MirrorOutcome::Fail(status) => Err(MirrorError::Status(status)),
            MirrorOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(MirrorError::Transport("unreachable".into()))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key servers
// ─────────────────────────────────────────────────────────────────────────────

/// Behaviour of a simulated key server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyServerMode {
    /// Evaluate requests against the ledger like a real server.
    Honest,
    /// Unreachable.
    Down,
    /// Refuse everything.
    Deny,
    /// Never answer.
    Hang,
}

/// A [`LocalKeyServer`] with a switchable failure mode.
///
/// Tracks how many requests it is serving at once, so tests can check that
/// a client never overlaps authorization requests.
pub struct SimKeyServer {
    inner: LocalKeyServer,
    mode: Mutex<KeyServerMode>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimKeyServer {
    pub fn public(&self) -> KeyServerPublic {
        self.inner.public()
    }

    pub fn set_mode(&self, mode: KeyServerMode) {
        *lock(&self.mode) = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most requests this server was handling at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyServer for SimKeyServer {
    fn id(&self) -> ObjectId {
        self.inner.public().id
    }

    async fn fetch_keys(
        &self,
        request: &FetchKeyRequest,
    ) -> Result<FetchKeyResponse, KeyServerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let serving = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(serving, Ordering::SeqCst);
        let _serving = InFlight(&self.in_flight);
        // Give concurrent callers a chance to arrive while this one is open.
        tokio::task::yield_now().await;

        let mode = *lock(&self.mode);
        match mode {
            KeyServerMode::Honest => self.inner.handle(request),
            KeyServerMode::Down => Err(KeyServerError::Transport("connection refused".into())),
            KeyServerMode::Deny => Err(KeyServerError::Denied("access denied".into())),
            KeyServerMode::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(KeyServerError::Transport("unreachable".into()))
            }
        }
    }
}

/// A committee of simulated key servers sharing one ledger view.
pub struct KeyNetwork {
    servers: Vec<Arc<SimKeyServer>>,
}

impl KeyNetwork {
    /// One server per mode, with deterministic ids and secrets.
    pub fn new(
        modes: &[KeyServerMode],
        app_id: ObjectId,
        ledger: Arc<LedgerSnapshot>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let servers = modes
            .iter()
            .enumerate()
            .map(|(i, mode)| {
                let master = X25519StaticSecret::from_bytes(named_id(&format!("key-secret-{i}")).0);
                Arc::new(SimKeyServer {
                    inner: LocalKeyServer::new(
                        named_id(&format!("key-server-{i}")),
                        master,
                        app_id,
                        Arc::clone(&ledger),
                        Arc::clone(&clock),
                    ),
                    mode: Mutex::new(*mode),
                    calls: AtomicUsize::new(0),
                    in_flight: AtomicUsize::new(0),
                    peak_in_flight: AtomicUsize::new(0),
                })
            })
            .collect();
        Self { servers }
    }

    pub fn servers(&self) -> &[Arc<SimKeyServer>] {
        &self.servers
    }

    pub fn publics(&self) -> Vec<KeyServerPublic> {
        self.servers.iter().map(|s| s.public()).collect()
    }

    pub fn as_dyn(&self) -> Vec<Arc<dyn KeyServer>> {
        self.servers
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn KeyServer>)
            .collect()
    }

    /// Requests received across the committee.
    pub fn total_calls(&self) -> usize {
        self.servers.iter().map(|s| s.calls()).sum()
    }

    /// Highest per-server concurrency seen across the committee.
    pub fn peak_in_flight(&self) -> usize {
        self.servers
            .iter()
            .map(|s| s.peak_in_flight())
            .max()
            .unwrap_or(0)
    }

    pub fn set_ledger(&self, ledger: Arc<LedgerSnapshot>) {
        for server in &self.servers {
            server.inner.set_ledger(Arc::clone(&ledger));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_id_is_stable_and_distinct() {
        assert_eq!(named_id("col-1"), named_id("col-1"));
        assert_ne!(named_id("col-1"), named_id("col-2"));
        assert!(!named_id("").is_zero());
    }

    #[tokio::test]
    async fn test_scripted_mirror_consumes_script_then_default() {
        let mirror = ScriptedMirror::new("m");
        let handle = BlobHandle::new("h").unwrap();
        mirror.put(&handle, b"data".to_vec());
        mirror.script([MirrorOutcome::Fail(503)]);

        assert_eq!(mirror.get(&handle).await, Err(MirrorError::Status(503)));
        assert_eq!(&mirror.get(&handle).await.unwrap()[..], b"data");
        assert_eq!(mirror.attempts(), 2);
    }

    #[tokio::test]
    async fn test_missing_blob_is_404() {
        let mirror = ScriptedMirror::new("m");
        let err = mirror.get(&BlobHandle::new("nope").unwrap()).await.unwrap_err();
        assert_eq!(err, MirrorError::Status(404));
    }

    #[tokio::test]
    async fn test_declining_wallet_counts_prompt() {
        let wallet = CountingWallet::named("alice");
        wallet.set_declining(true);

        assert_eq!(wallet.sign(b"challenge").await, Err(SignError::Declined));
        assert_eq!(wallet.prompts(), 1);
    }
}
