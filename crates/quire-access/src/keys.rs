//! Key retrieval from the threshold key-server network.
//!
//! The client presents one signed [`AuthorizationTx`] per batch of objects
//! to every key server at once and keeps the first `threshold` valid
//! answers. Batches run strictly one after another; the first failing
//! batch ends the attempt and nothing is kept.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use quire_core::{BindingId, Ed25519Signature, ObjectId};

use crate::credential::{Certificate, SessionCredential};
use crate::crypto::{EncryptionKey, X25519PublicKey};
use crate::envelope::ObjectHeader;
use crate::error::{AccessError, KeyServerError, Result};
use crate::policy::AuthorizationRequest;
use crate::sealed::SealedKey;
use crate::tx::{AccessCheck, AuthorizationTx};

/// Key request sent to every key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchKeyRequest {
    /// Canonical CBOR of an [`AuthorizationTx`].
    pub tx_bytes: Vec<u8>,
    /// Session X25519 key that derived keys are sealed to.
    pub enc_key: X25519PublicKey,
    pub certificate: Certificate,
    /// Session signature over `tx_bytes || enc_key`.
    pub request_signature: Ed25519Signature,
}

/// One derived key, sealed to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedKey {
    pub binding: BindingId,
    pub sealed: SealedKey,
}

/// A key server's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchKeyResponse {
    pub server_id: ObjectId,
    pub keys: Vec<DerivedKey>,
}

/// A member of the key-server network.
#[async_trait]
pub trait KeyServer: Send + Sync {
    /// The id share entries in object headers are addressed to.
    fn id(&self) -> ObjectId;

    /// Evaluate the request and return sealed keys for every check.
    async fn fetch_keys(
        &self,
        request: &FetchKeyRequest,
    ) -> std::result::Result<FetchKeyResponse, KeyServerError>;
}

/// Context a derived key is sealed under.
pub(crate) fn seal_context(binding: &BindingId, server_id: &ObjectId) -> Vec<u8> {
    let mut out = Vec::with_capacity(96);
    out.extend_from_slice(&binding.to_bytes());
    out.extend_from_slice(server_id.as_bytes());
    out
}

/// Enough of an encrypted object to ask for its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub binding: BindingId,
    pub ephemeral_public: X25519PublicKey,
}

impl From<&ObjectHeader> for ObjectRef {
    fn from(header: &ObjectHeader) -> Self {
        Self {
            binding: header.binding,
            ephemeral_public: header.ephemeral_public,
        }
    }
}

/// Derived keys for one object, by key server.
#[derive(Clone)]
pub struct ObjectKeys {
    binding: BindingId,
    keys: BTreeMap<ObjectId, EncryptionKey>,
}

impl ObjectKeys {
    pub fn new(binding: BindingId) -> Self {
        Self {
            binding,
            keys: BTreeMap::new(),
        }
    }

    /// The binding these keys were authorized for.
    pub fn binding(&self) -> &BindingId {
        &self.binding
    }

    pub fn insert(&mut self, server_id: ObjectId, key: EncryptionKey) {
        self.keys.insert(server_id, key);
    }

    pub fn get(&self, server_id: &ObjectId) -> Option<&EncryptionKey> {
        self.keys.get(server_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn servers(&self) -> impl Iterator<Item = &ObjectId> {
        self.keys.keys()
    }
}

impl fmt::Debug for ObjectKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectKeys")
            .field("binding", &self.binding)
            .field("servers", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Key material for one decryption attempt.
#[derive(Debug, Clone, Default)]
pub struct KeyMaterial {
    objects: HashMap<BindingId, ObjectKeys>,
}

impl KeyMaterial {
    pub fn get(&self, binding: &BindingId) -> Option<&ObjectKeys> {
        self.objects.get(binding)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn insert(&mut self, server_id: ObjectId, binding: BindingId, key: EncryptionKey) {
        self.objects
            .entry(binding)
            .or_insert_with(|| ObjectKeys::new(binding))
            .insert(server_id, key);
    }

    fn merge(&mut self, other: KeyMaterial) {
        for (binding, keys) in other.objects {
            let entry = self
                .objects
                .entry(binding)
                .or_insert_with(|| ObjectKeys::new(binding));
            entry.keys.extend(keys.keys);
        }
    }
}

/// Key retrieval settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyServerConfig {
    /// Valid responses needed per batch.
    pub threshold: usize,
    /// Objects per authorization transaction.
    pub batch_size: usize,
    /// Per-server timeout for one batch.
    pub request_timeout: Duration,
}

impl Default for KeyServerConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            batch_size: 10,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Tally of one batch.
#[derive(Default)]
struct BatchOutcome {
    valid: Vec<(ObjectId, Vec<(BindingId, EncryptionKey)>)>,
    denied: usize,
    failed: usize,
    last_denial: Option<String>,
}

/// Client side of the key-server network.
pub struct KeyServerClient {
    servers: Vec<Arc<dyn KeyServer>>,
    config: KeyServerConfig,
}

impl KeyServerClient {
    /// Create a client. The threshold must be reachable.
    pub fn new(servers: Vec<Arc<dyn KeyServer>>, config: KeyServerConfig) -> Result<Self> {
        if config.threshold == 0 || config.threshold > servers.len() {
            return Err(AccessError::Config(format!(
                "threshold {} needs between 1 and {} key servers",
                config.threshold,
                servers.len()
            )));
        }
        if config.batch_size == 0 {
            return Err(AccessError::Config("batch size must be positive".into()));
        }
        let mut ids = HashSet::new();
        if let Some(dup) = servers.iter().find(|s| !ids.insert(s.id())) {
            return Err(AccessError::Config(format!(
                "key server {} listed twice",
                dup.id()
            )));
        }
        Ok(Self { servers, config })
    }

    pub fn config(&self) -> &KeyServerConfig {
        &self.config
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Fetch derived keys for `objects`, authorized by `request`.
    pub async fn fetch_keys(
        &self,
        objects: &[ObjectRef],
        request: &AuthorizationRequest,
        credential: &SessionCredential,
    ) -> Result<KeyMaterial> {
        let mut seen = HashSet::new();
        let unique: Vec<ObjectRef> = objects
            .iter()
            .filter(|o| seen.insert(o.binding))
            .copied()
            .collect();

        if let Some(stray) = unique.iter().find(|o| !request.covers(&o.binding)) {
            return Err(AccessError::Unauthorized(format!(
                "request does not cover {}",
                stray.binding
            )));
        }

        let mut material = KeyMaterial::default();
        for (batch_no, batch) in unique.chunks(self.config.batch_size).enumerate() {
            debug!(batch_no, objects = batch.len(), "requesting key batch");
            let keys = self.fetch_batch(batch, request, credential).await?;
            material.merge(keys);
        }

        info!(
            objects = material.len(),
            account = %credential.account(),
            "key material retrieved"
        );
        Ok(material)
    }

    async fn fetch_batch(
        &self,
        batch: &[ObjectRef],
        request: &AuthorizationRequest,
        credential: &SessionCredential,
    ) -> Result<KeyMaterial> {
        let tx = AuthorizationTx {
            sender: credential.account(),
            app_id: credential.app_id(),
            checks: batch
                .iter()
                .map(|o| AccessCheck {
                    binding: o.binding,
                    ephemeral_public: o.ephemeral_public,
                    request: *request,
                })
                .collect(),
        };
        let tx_bytes = tx.to_bytes()?;
        let enc_key = credential.enc_public();
        let fetch = FetchKeyRequest {
            request_signature: credential.sign_request(&tx_bytes, &enc_key),
            tx_bytes,
            enc_key,
            certificate: credential.certificate().clone(),
        };

        let threshold = self.config.threshold;
        let total = self.servers.len();
        let timeout = self.config.request_timeout;
        let fetch = &fetch;

        let mut pending: FuturesUnordered<_> = self
            .servers
            .iter()
            .map(|server| async move {
                let id = server.id();
                let result = tokio::time::timeout(timeout, server.fetch_keys(fetch)).await;
                (id, result)
            })
            .collect();

        let mut outcome = BatchOutcome::default();
        while let Some((server_id, result)) = pending.next().await {
            match result {
                Ok(Ok(response)) => match open_response(server_id, &response, batch, credential) {
                    Ok(keys) => outcome.valid.push((server_id, keys)),
                    Err(reason) => {
                        warn!(%server_id, %reason, "discarding invalid key server response");
                        outcome.failed += 1;
                    }
                },
                Ok(Err(KeyServerError::Denied(reason))) => {
                    debug!(%server_id, %reason, "key server denied request");
                    outcome.denied += 1;
                    outcome.last_denial = Some(reason);
                }
                Ok(Err(e)) => {
                    warn!(%server_id, error = %e, "key server request failed");
                    outcome.failed += 1;
                }
                Err(_) => {
                    warn!(%server_id, ?timeout, "key server timed out");
                    outcome.failed += 1;
                }
            }

            if outcome.valid.len() >= threshold || outcome.denied > total - threshold {
                break;
            }
        }

        if outcome.valid.len() >= threshold {
            let mut material = KeyMaterial::default();
            for (server_id, keys) in outcome.valid {
                for (binding, key) in keys {
                    material.insert(server_id, binding, key);
                }
            }
            return Ok(material);
        }

        if outcome.denied > total - threshold {
            return Err(AccessError::Unauthorized(
                outcome
                    .last_denial
                    .unwrap_or_else(|| "key servers denied the request".into()),
            ));
        }

        Err(AccessError::Quorum {
            required: threshold,
            valid: outcome.valid.len(),
            denied: outcome.denied,
            failed: outcome.failed,
        })
    }
}

/// Check a response covers the batch exactly and unseal its keys.
fn open_response(
    server_id: ObjectId,
    response: &FetchKeyResponse,
    batch: &[ObjectRef],
    credential: &SessionCredential,
) -> std::result::Result<Vec<(BindingId, EncryptionKey)>, String> {
    if response.server_id != server_id {
        return Err(format!("response claims to be from {}", response.server_id));
    }
    if response.keys.len() != batch.len() {
        return Err(format!(
            "expected {} keys, got {}",
            batch.len(),
            response.keys.len()
        ));
    }

    batch
        .iter()
        .map(|object| {
            let derived = response
                .keys
                .iter()
                .find(|k| k.binding == object.binding)
                .ok_or_else(|| format!("missing key for {}", object.binding))?;
            let key = derived
                .sealed
                .open(
                    credential.enc_secret(),
                    &seal_context(&object.binding, &server_id),
                )
                .map_err(|e| format!("key for {} does not unseal: {e}", object.binding))?;
            Ok((object.binding, key))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialConfig, CredentialManager, WalletSignature, WalletSigner};
    use crate::crypto::X25519StaticSecret;
    use crate::envelope::{EncryptedObjectBuilder, KeyServerPublic};
    use crate::error::SignError;
    use crate::server::LocalKeyServer;
    use quire_core::{
        AccountAddress, Column, ColumnStatus, FileMeta, Installment, Keypair, LedgerBuilder,
        LedgerSnapshot, ManualClock, PaymentPolicy, Subscription,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const APP: ObjectId = ObjectId([0xA9; 32]);

    fn id(n: u8) -> ObjectId {
        ObjectId([n; 32])
    }

    struct Wallet(Keypair);

    #[async_trait]
    impl WalletSigner for Wallet {
        fn account(&self) -> AccountAddress {
            self.0.address()
        }

        async fn sign(&self, message: &[u8]) -> std::result::Result<WalletSignature, SignError> {
            Ok(WalletSignature {
                public_key: self.0.public_key(),
                signature: self.0.sign(message),
            })
        }
    }

    /// Behaviour of a simulated server.
    #[derive(Clone, Copy)]
    enum Mode {
        Honest,
        Down,
        Deny,
        Hang,
        Impostor,
    }

    struct SimServer {
        inner: LocalKeyServer,
        mode: Mode,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyServer for SimServer {
        fn id(&self) -> ObjectId {
            self.inner.public().id
        }

        async fn fetch_keys(
            &self,
            request: &FetchKeyRequest,
        ) -> std::result::Result<FetchKeyResponse, KeyServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Honest => self.inner.handle(request),
                Mode::Down => Err(KeyServerError::Transport("connection refused".into())),
                Mode::Deny => Err(KeyServerError::Denied("no".into())),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(KeyServerError::Transport("unreachable".into()))
                }
                Mode::Impostor => {
                    let mut response = self.inner.handle(request)?;
                    response.server_id = id(0xEE);
                    Ok(response)
                }
            }
        }
    }

    struct Fixture {
        servers: Vec<Arc<SimServer>>,
        credential: Arc<SessionCredential>,
        objects: Vec<ObjectRef>,
        request: AuthorizationRequest,
    }

    /// One column with `files` files in a single published installment,
    /// a subscription owned by the wallet's account, and one key server
    /// per mode.
    async fn fixture(modes: &[Mode], files: u8) -> Fixture {
        let wallet = Arc::new(Wallet(Keypair::from_seed(&[1; 32])));
        let owner = wallet.account();
        let clock = Arc::new(ManualClock::new(1_000));

        let file_ids: Vec<ObjectId> = (0..files).map(|n| id(100 + n)).collect();
        let mut builder = LedgerBuilder::new(64)
            .column(Column {
                id: id(1),
                creator: AccountAddress([0xC1; 32]),
                payment_policy_id: id(5),
                cadence_policy_id: id(6),
                status: ColumnStatus::Published,
            })
            .payment_policy(PaymentPolicy {
                id: id(5),
                column_id: id(1),
                subscription_period_ms: 86_400_000,
                price: 1,
            })
            .subscription(Subscription {
                id: id(30),
                owner,
                column_id: id(1),
                payment_policy_id: id(5),
                start_ms: 0,
            })
            .installment(Installment {
                id: id(50),
                column_id: id(1),
                sequence: 1,
                published: true,
                files: file_ids.clone(),
            });
        for file_id in &file_ids {
            builder = builder.file(FileMeta {
                id: *file_id,
                title: String::new(),
                directory_id: None,
                blob: None,
                created_at_ms: 0,
                updated_at_ms: 0,
            });
        }
        let ledger = Arc::new(builder.build().unwrap());

        let servers: Vec<Arc<SimServer>> = modes
            .iter()
            .enumerate()
            .map(|(i, mode)| {
                Arc::new(SimServer {
                    inner: LocalKeyServer::new(
                        id(200 + i as u8),
                        X25519StaticSecret::from_bytes([i as u8 + 1; 32]),
                        APP,
                        Arc::clone(&ledger),
                        clock.clone(),
                    ),
                    mode: *mode,
                    calls: AtomicUsize::new(0),
                })
            })
            .collect();
        let publics: Vec<KeyServerPublic> = servers.iter().map(|s| s.inner.public()).collect();

        let objects = file_ids
            .iter()
            .map(|file_id| {
                let object =
                    EncryptedObjectBuilder::new(BindingId::new(id(1), *file_id), b"x".to_vec())
                        .build(&publics)
                        .unwrap();
                ObjectRef::from(&object.header)
            })
            .collect();

        let manager = CredentialManager::new(CredentialConfig::new(APP), wallet, clock);
        let credential = manager.get_or_create(&owner).await.unwrap();

        let request = AuthorizationRequest::Subscriber {
            subscription_id: id(30),
            column_id: id(1),
            payment_policy_id: id(5),
            installment_id: id(50),
        };

        Fixture {
            servers,
            credential,
            objects,
            request,
        }
    }

    fn client(fixture: &Fixture, config: KeyServerConfig) -> KeyServerClient {
        let servers = fixture
            .servers
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn KeyServer>)
            .collect();
        KeyServerClient::new(servers, config).unwrap()
    }

    #[tokio::test]
    async fn test_two_of_five_is_enough() {
        use Mode::*;
        let f = fixture(&[Down, Honest, Down, Honest, Down], 1).await;
        let material = client(&f, KeyServerConfig::default())
            .fetch_keys(&f.objects, &f.request, &f.credential)
            .await
            .unwrap();

        let keys = material.get(&f.objects[0].binding).unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_one_of_five_is_quorum_error() {
        use Mode::*;
        let f = fixture(&[Down, Down, Honest, Down, Down], 1).await;
        let err = client(&f, KeyServerConfig::default())
            .fetch_keys(&f.objects, &f.request, &f.credential)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AccessError::Quorum { required: 2, valid: 1, denied: 0, failed: 4 }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_denials_past_tolerance_are_unauthorized() {
        use Mode::*;
        let f = fixture(&[Deny, Deny, Deny, Deny, Honest], 1).await;
        let err = client(&f, KeyServerConfig::default())
            .fetch_keys(&f.objects, &f.request, &f.credential)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Unauthorized(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_denials_within_tolerance_are_quorum_error() {
        use Mode::*;
        let f = fixture(&[Deny, Deny, Deny, Down, Honest], 1).await;
        let err = client(&f, KeyServerConfig::default())
            .fetch_keys(&f.objects, &f.request, &f.credential)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Quorum { denied: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_server_times_out() {
        use Mode::*;
        let f = fixture(&[Hang, Hang, Honest], 1).await;
        let err = client(&f, KeyServerConfig::default())
            .fetch_keys(&f.objects, &f.request, &f.credential)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Quorum { valid: 1, failed: 2, .. }));
    }

    #[tokio::test]
    async fn test_impostor_response_is_discarded() {
        use Mode::*;
        let f = fixture(&[Impostor, Honest, Down], 1).await;
        let err = client(&f, KeyServerConfig::default())
            .fetch_keys(&f.objects, &f.request, &f.credential)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Quorum { valid: 1, failed: 2, .. }));
    }

    #[tokio::test]
    async fn test_objects_outside_request_never_leave_the_client() {
        use Mode::*;
        let f = fixture(&[Honest, Honest, Honest], 1).await;
        let stray = ObjectRef {
            binding: BindingId::new(id(2), id(100)),
            ..f.objects[0]
        };
        let err = client(&f, KeyServerConfig::default())
            .fetch_keys(&[f.objects[0], stray], &f.request, &f.credential)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Unauthorized(_)));
        assert_eq!(f.servers[0].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batches_of_ten() {
        use Mode::*;
        let f = fixture(&[Honest, Honest, Honest], 25).await;
        let material = client(
            &f,
            KeyServerConfig {
                threshold: 3,
                ..KeyServerConfig::default()
            },
        )
        .fetch_keys(&f.objects, &f.request, &f.credential)
        .await
        .unwrap();

        assert_eq!(material.len(), 25);
        // 10 + 10 + 5
        for server in &f.servers {
            assert_eq!(server.calls.load(Ordering::SeqCst), 3);
        }
    }

    #[tokio::test]
    async fn test_duplicate_objects_collapse() {
        use Mode::*;
        let f = fixture(&[Honest, Honest], 1).await;
        let many: Vec<ObjectRef> = std::iter::repeat(f.objects[0]).take(25).collect();
        let material = client(&f, KeyServerConfig::default())
            .fetch_keys(&many, &f.request, &f.credential)
            .await
            .unwrap();

        assert_eq!(material.len(), 1);
        assert_eq!(f.servers[0].calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_aborts_attempt() {
        use Mode::*;
        let f = fixture(&[Honest, Honest, Honest], 12).await;
        // With an empty ledger every server denies the first batch and the
        // second is never sent.
        for server in &f.servers {
            server.inner.set_ledger(Arc::new(LedgerSnapshot::default()));
        }
        let err = client(&f, KeyServerConfig::default())
            .fetch_keys(&f.objects, &f.request, &f.credential)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Unauthorized(_)));
        for server in &f.servers {
            assert!(server.calls.load(Ordering::SeqCst) <= 1);
        }
    }

    #[test]
    fn test_client_rejects_unreachable_threshold() {
        let config = KeyServerConfig {
            threshold: 3,
            ..KeyServerConfig::default()
        };
        assert!(matches!(
            KeyServerClient::new(Vec::new(), config),
            Err(AccessError::Config(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = KeyServerConfig::default();
        assert_eq!(config.threshold, 2);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }
}
