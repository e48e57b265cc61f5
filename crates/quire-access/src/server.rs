//! Reference key server.
//!
//! Holds an X25519 master secret, a ledger snapshot and a clock. A request
//! is answered only if the certificate, the request signature and every
//! embedded check hold; a failing check denies the whole request.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use quire_core::{Clock, LedgerSnapshot, ObjectId};

use crate::credential::request_message;
use crate::crypto::X25519StaticSecret;
use crate::envelope::{derive_share_key, KeyServerPublic};
use crate::error::KeyServerError;
use crate::keys::{seal_context, DerivedKey, FetchKeyRequest, FetchKeyResponse, KeyServer};
use crate::sealed::SealedKey;
use crate::tx::AuthorizationTx;

/// Upper bound on checks in one transaction.
pub const MAX_CHECKS_PER_TX: usize = 100;

/// In-process key server.
pub struct LocalKeyServer {
    id: ObjectId,
    master: X25519StaticSecret,
    app_id: ObjectId,
    ledger: RwLock<Arc<LedgerSnapshot>>,
    clock: Arc<dyn Clock>,
}

impl LocalKeyServer {
    pub fn new(
        id: ObjectId,
        master: X25519StaticSecret,
        app_id: ObjectId,
        ledger: Arc<LedgerSnapshot>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            master,
            app_id,
            ledger: RwLock::new(ledger),
            clock,
        }
    }

    /// What encryptors need to address shares to this server.
    pub fn public(&self) -> KeyServerPublic {
        KeyServerPublic {
            id: self.id,
            public_key: self.master.public_key(),
        }
    }

    /// Replace the ledger view.
    pub fn set_ledger(&self, ledger: Arc<LedgerSnapshot>) {
        *self.ledger.write().unwrap_or_else(|e| e.into_inner()) = ledger;
    }

    fn ledger(&self) -> Arc<LedgerSnapshot> {
        Arc::clone(&self.ledger.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Evaluate a request.
    pub fn handle(
        &self,
        request: &FetchKeyRequest,
    ) -> Result<FetchKeyResponse, KeyServerError> {
        let now = self.clock.now_millis();
        let cert = &request.certificate;

        cert.verify_signature()
            .map_err(KeyServerError::InvalidRequest)?;
        if cert.app_id != self.app_id {
            return Err(KeyServerError::InvalidRequest(format!(
                "certificate is for application {}",
                cert.app_id
            )));
        }
        if cert.is_expired(now) {
            return Err(KeyServerError::InvalidRequest(
                "session certificate has expired".into(),
            ));
        }
        cert.session_key
            .verify(
                &request_message(&request.tx_bytes, &request.enc_key),
                &request.request_signature,
            )
            .map_err(|_| KeyServerError::InvalidRequest("request signature is invalid".into()))?;

        let tx = AuthorizationTx::from_bytes(&request.tx_bytes)
            .map_err(|e| KeyServerError::InvalidRequest(e.to_string()))?;
        if tx.sender != cert.account {
            return Err(KeyServerError::InvalidRequest(
                "transaction sender is not the certificate account".into(),
            ));
        }
        if tx.app_id != self.app_id {
            return Err(KeyServerError::InvalidRequest(format!(
                "transaction is for application {}",
                tx.app_id
            )));
        }
        if tx.checks.is_empty() || tx.checks.len() > MAX_CHECKS_PER_TX {
            return Err(KeyServerError::InvalidRequest(format!(
                "transaction carries {} checks",
                tx.checks.len()
            )));
        }

        let ledger = self.ledger();
        for check in &tx.checks {
            check
                .request
                .verify(&check.binding, &tx.sender, &ledger, now)
                .map_err(|denial| {
                    debug!(server = %self.id, binding = %check.binding, %denial, "check failed");
                    KeyServerError::Denied(format!("{}: {denial}", check.binding))
                })?;
        }

        let keys = tx
            .checks
            .iter()
            .map(|check| {
                let derived = derive_share_key(
                    &self.master.diffie_hellman(&check.ephemeral_public),
                    &check.binding,
                    &self.id,
                );
                let sealed = SealedKey::seal(
                    &derived,
                    &request.enc_key,
                    &seal_context(&check.binding, &self.id),
                )
                .map_err(|e| KeyServerError::Transport(e.to_string()))?;
                Ok(DerivedKey {
                    binding: check.binding,
                    sealed,
                })
            })
            .collect::<Result<Vec<_>, KeyServerError>>()?;

        info!(server = %self.id, account = %tx.sender, keys = keys.len(), "released keys");
        Ok(FetchKeyResponse {
            server_id: self.id,
            keys,
        })
    }
}

#[async_trait]
impl KeyServer for LocalKeyServer {
    fn id(&self) -> ObjectId {
        self.id
    }

    async fn fetch_keys(
        &self,
        request: &FetchKeyRequest,
    ) -> Result<FetchKeyResponse, KeyServerError> {
        self.handle(request)
    }
}
