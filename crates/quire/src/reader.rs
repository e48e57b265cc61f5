//! The Reader: request a file, get its plaintext.
//!
//! One request walks the whole pipeline: ledger snapshot, capability
//! selection, authorization request, session credential, blob retrieval,
//! threshold key retrieval and decryption. Decrypted content is cached per
//! account until [`Reader::invalidate`] or [`Reader::clear_content`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::future::{self, AbortHandle, Aborted};
use serde::Deserialize;
use tracing::{debug, info, warn};

use quire_access::{
    build, select_capability, AccessRole, AuthorizationRequest, CredentialManager,
    DecryptionEngine, EncryptedObject, KeyServerClient, ObjectHeader, ObjectKeys, ObjectRef,
    ResourceIds, SessionCredential,
};
use quire_core::{
    AccountAddress, BindingId, Capability, Clock, Column, Installment, LedgerSnapshot, ObjectId,
    ValidationError,
};
use quire_graph::{GraphConfig, ObjectGraph, SnapshotLoader};
use quire_transport::{BlobRetriever, FetchError};

use crate::cache::ContentCache;
use crate::error::{ReaderError, Result};

/// Per-file outcome of an installment request, in installment order.
pub type InstallmentContent = Vec<(ObjectId, Result<Arc<Vec<u8>>>)>;

/// Configuration for the Reader.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Object graph queries and snapshot validation.
    pub graph: GraphConfig,
    /// Decrypted files kept in memory. Zero disables the cache.
    pub max_cached_files: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            max_cached_files: 256,
        }
    }
}

/// Entry point for reading gated content.
pub struct Reader<G: ObjectGraph + ?Sized> {
    config: ReaderConfig,
    graph: Arc<G>,
    loader: SnapshotLoader,
    credentials: Arc<CredentialManager>,
    retriever: Arc<BlobRetriever>,
    keys: Arc<KeyServerClient>,
    engine: DecryptionEngine,
    clock: Arc<dyn Clock>,
    cache: Mutex<ContentCache>,
}

impl<G: ObjectGraph + ?Sized> Reader<G> {
    pub fn new(
        config: ReaderConfig,
        graph: Arc<G>,
        credentials: Arc<CredentialManager>,
        retriever: Arc<BlobRetriever>,
        keys: Arc<KeyServerClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            loader: SnapshotLoader::new(config.graph.clone()),
            cache: Mutex::new(ContentCache::new(config.max_cached_files)),
            config,
            graph,
            credentials,
            retriever,
            keys,
            engine: DecryptionEngine::new(),
            clock,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Read one file on behalf of `account`.
    ///
    /// Fails with [`ReaderError::Unauthorized`] before any mirror, wallet or
    /// key server is contacted when the account holds no capability over the
    /// file's column.
    pub async fn request_file(
        &self,
        account: &AccountAddress,
        file_id: &ObjectId,
    ) -> Result<Arc<Vec<u8>>> {
        require_id("file_id", file_id)?;
        if let Some(hit) = self.cached(account, file_id) {
            debug!(%account, file = %file_id, "serving file from cache");
            return Ok(hit);
        }

        let ledger = self.snapshot().await?;
        let resolved = ledger
            .resolve_file(file_id)
            .ok_or_else(|| not_found(*file_id, "file is not listed in any installment"))?;
        let capability = self.select(&ledger, account, &resolved.column)?;
        let request = request_for(
            &capability,
            &resolved.column,
            &resolved.installment,
            Some(*file_id),
        )?;
        let handle = resolved
            .file
            .blob
            .clone()
            .ok_or_else(|| not_found(*file_id, "no blob has been uploaded"))?;

        let credential = self.credentials.get_or_create(account).await?;
        let blob = self
            .retriever
            .fetch(&handle)
            .await
            .map_err(|e| fetch_error(*file_id, e))?;
        let header = parse_bound_header(&blob, &resolved.binding())?;
        let material = self
            .keys
            .fetch_keys(&[ObjectRef::from(&header)], &request, &credential)
            .await?;

        self.decrypt_and_cache(account, *file_id, &blob, material.get(&header.binding))
    }

    /// Read every file of an installment.
    ///
    /// Blobs are fetched concurrently. A subscriber's installment is
    /// authorized with one key request; a creator's files are authorized
    /// one after another, never with two requests in flight. A failure that
    /// affects the whole attempt (no capability, declined signature, any
    /// denied or short key request) is the outer error; blob and decryption
    /// failures are reported per file.
    pub async fn request_installment(
        &self,
        account: &AccountAddress,
        installment_id: &ObjectId,
    ) -> Result<InstallmentContent> {
        require_id("installment_id", installment_id)?;

        let ledger = self.snapshot().await?;
        let installment = ledger
            .installment(installment_id)
            .ok_or_else(|| not_found(*installment_id, "unknown installment"))?;
        let column = ledger
            .column(&installment.column_id)
            .ok_or_else(|| not_found(installment.column_id, "unknown column"))?;
        let capability = self.select(&ledger, account, column)?;

        let mut results: Vec<Option<Result<Arc<Vec<u8>>>>> =
            installment.files.iter().map(|_| None).collect();
        let mut pending = Vec::new();
        for (pos, file_id) in installment.files.iter().enumerate() {
            if let Some(hit) = self.cached(account, file_id) {
                results[pos] = Some(Ok(hit));
                continue;
            }
            match ledger.file(file_id).and_then(|f| f.blob.clone()) {
                Some(handle) => pending.push((pos, *file_id, handle)),
                None => {
                    results[pos] = Some(Err(not_found(*file_id, "no blob has been uploaded")));
                }
            }
        }

        if !pending.is_empty() {
            let credential = self.credentials.get_or_create(account).await?;
            let handles: Vec<_> = pending.iter().map(|(_, _, handle)| handle.clone()).collect();
            let blobs = self.retriever.fetch_many(&handles).await;

            let mut fetched = Vec::new();
            for ((pos, file_id, _), blob) in pending.into_iter().zip(blobs) {
                let binding = BindingId::new(column.id, file_id);
                let opened = blob
                    .map_err(|e| fetch_error(file_id, e))
                    .and_then(|blob| Ok((parse_bound_header(&blob, &binding)?, blob)));
                match opened {
                    Ok((header, blob)) => fetched.push(Fetched {
                        pos,
                        file_id,
                        header,
                        blob,
                    }),
                    Err(e) => results[pos] = Some(Err(e)),
                }
            }

            let opened = self
                .open_installment(account, &capability, column, installment, &credential, fetched)
                .await?;
            for (pos, outcome) in opened {
                results[pos] = Some(outcome);
            }
        }

        info!(
            %account,
            installment = %installment_id,
            files = results.len(),
            "installment requested"
        );
        Ok(installment
            .files
            .iter()
            .copied()
            .zip(results)
            .map(|(file_id, outcome)| {
                let outcome = outcome
                    .unwrap_or_else(|| Err(ReaderError::NoAccess("file was not processed".into())));
                (file_id, outcome)
            })
            .collect())
    }

    /// [`request_file`](Self::request_file) with an abort handle.
    ///
    /// Aborting resolves the future to [`ReaderError::Cancelled`] and
    /// drops any in-flight mirror or key-server request. An aborted
    /// request never writes to the cache.
    pub fn request_file_abortable<'a>(
        &'a self,
        account: &'a AccountAddress,
        file_id: &'a ObjectId,
    ) -> (impl Future<Output = Result<Arc<Vec<u8>>>> + Send + 'a, AbortHandle) {
        let (request, abort) = future::abortable(self.request_file(account, file_id));
        let request = async move {
            match request.await {
                Ok(result) => result,
                Err(Aborted) => {
                    debug!(file = %file_id, "request aborted");
                    Err(ReaderError::Cancelled)
                }
            }
        };
        (request, abort)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invalidation
    // ─────────────────────────────────────────────────────────────────────────

    /// Forget all decrypted content and the session credential.
    ///
    /// Call on wallet change or sign-out.
    pub async fn invalidate(&self) {
        self.clear_content();
        self.credentials.invalidate().await;
        info!("reader state invalidated");
    }

    /// Forget decrypted content, keeping the session credential.
    pub fn clear_content(&self) {
        self.cache_lock().clear();
    }

    /// Cached plaintext of `file_id` for `account`, if any.
    pub fn cached(&self, account: &AccountAddress, file_id: &ObjectId) -> Option<Arc<Vec<u8>>> {
        self.cache_lock().get(account, file_id)
    }

    pub fn cached_count(&self) -> usize {
        self.cache_lock().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        Ok(self.loader.load(self.graph.as_ref()).await?)
    }

    fn select(
        &self,
        ledger: &LedgerSnapshot,
        account: &AccountAddress,
        column: &Column,
    ) -> Result<Capability> {
        let now = self.clock.now_millis();
        select_capability(ledger, account, &column.id, now).ok_or_else(|| {
            warn!(%account, column = %column.id, "no capability over column");
            ReaderError::Unauthorized(format!(
                "{account} holds no creator capability or active subscription for column {}",
                column.id
            ))
        })
    }

    async fn open_installment(
        &self,
        account: &AccountAddress,
        capability: &Capability,
        column: &Column,
        installment: &Installment,
        credential: &SessionCredential,
        fetched: Vec<Fetched>,
    ) -> Result<Vec<(usize, Result<Arc<Vec<u8>>>)>> {
        if fetched.is_empty() {
            return Ok(Vec::new());
        }

        match capability {
            Capability::Subscriber(_) => {
                let request = request_for(capability, column, installment, None)?;
                let objects: Vec<ObjectRef> =
                    fetched.iter().map(|f| ObjectRef::from(&f.header)).collect();
                let material = self.keys.fetch_keys(&objects, &request, credential).await?;
                Ok(fetched
                    .into_iter()
                    .map(|f| {
                        let keys = material.get(&f.header.binding);
                        (f.pos, self.decrypt_and_cache(account, f.file_id, &f.blob, keys))
                    })
                    .collect())
            }
            Capability::Creator(_) => {
                // One key request per file, never overlapping; the first
                // quorum or policy failure ends the whole attempt.
                let mut opened = Vec::with_capacity(fetched.len());
                for f in fetched {
                    let request = request_for(capability, column, installment, Some(f.file_id))?;
                    let material = self
                        .keys
                        .fetch_keys(&[ObjectRef::from(&f.header)], &request, credential)
                        .await?;
                    let keys = material.get(&f.header.binding);
                    opened.push((f.pos, self.decrypt_and_cache(account, f.file_id, &f.blob, keys)));
                }
                Ok(opened)
            }
        }
    }

    fn decrypt_and_cache(
        &self,
        account: &AccountAddress,
        file_id: ObjectId,
        blob: &[u8],
        keys: Option<&ObjectKeys>,
    ) -> Result<Arc<Vec<u8>>> {
        let keys = keys.ok_or_else(|| {
            ReaderError::NoAccess(format!("no key material was released for {file_id}"))
        })?;
        let plaintext = Arc::new(self.engine.decrypt(blob, keys)?);

        self.cache_lock()
            .insert(*account, file_id, Arc::clone(&plaintext));
        info!(%account, file = %file_id, len = plaintext.len(), "file decrypted");
        Ok(plaintext)
    }

    fn cache_lock(&self) -> MutexGuard<'_, ContentCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Fetched {
    pos: usize,
    file_id: ObjectId,
    header: ObjectHeader,
    blob: Bytes,
}

fn request_for(
    capability: &Capability,
    column: &Column,
    installment: &Installment,
    file_id: Option<ObjectId>,
) -> Result<AuthorizationRequest> {
    let payment_policy_id = match capability {
        Capability::Subscriber(sub) => sub.payment_policy_id,
        Capability::Creator(_) => column.payment_policy_id,
    };
    let resources = ResourceIds {
        column_id: Some(column.id),
        file_id,
        installment_id: Some(installment.id),
        payment_policy_id: Some(payment_policy_id),
    };
    Ok(build(&AccessRole::from(capability), &resources)?)
}

fn parse_bound_header(blob: &[u8], expected: &BindingId) -> Result<ObjectHeader> {
    let header = EncryptedObject::parse_header(blob)?;
    if header.binding != *expected {
        return Err(ReaderError::Format(format!(
            "blob is bound to {}, expected {expected}",
            header.binding
        )));
    }
    Ok(header)
}

fn require_id(field: &'static str, id: &ObjectId) -> Result<()> {
    if id.is_zero() {
        return Err(ValidationError::new(field, "zero address").into());
    }
    Ok(())
}

fn not_found(id: ObjectId, detail: &str) -> ReaderError {
    ReaderError::NotFound {
        id,
        detail: detail.to_string(),
    }
}

fn fetch_error(file_id: ObjectId, err: FetchError) -> ReaderError {
    match err {
        FetchError::NotFound { handle, attempts } => not_found(
            file_id,
            &format!("blob {handle} unavailable after {attempts} mirror attempts"),
        ),
        FetchError::Aborted => ReaderError::Cancelled,
    }
}
