//! Session credentials.
//!
//! A wallet signs one challenge per session. The resulting credential binds
//! a fresh Ed25519 session key (which signs key requests) and a fresh X25519
//! key (which receives sealed key material) to the account for a fixed TTL.
//!
//! [`CredentialManager`] caches at most one credential per process.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use quire_core::{AccountAddress, Clock, Ed25519PublicKey, Ed25519Signature, Keypair, ObjectId};

use crate::crypto::{X25519PublicKey, X25519StaticSecret};
use crate::error::{AccessError, Result, SignError};

/// Default credential lifetime.
pub const DEFAULT_TTL_MINUTES: u32 = 10;

/// Credential settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialConfig {
    /// Application the credential is issued for; key servers check it.
    pub app_id: ObjectId,

    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
}

fn default_ttl_minutes() -> u32 {
    DEFAULT_TTL_MINUTES
}

impl CredentialConfig {
    pub fn new(app_id: ObjectId) -> Self {
        Self {
            app_id,
            ttl_minutes: DEFAULT_TTL_MINUTES,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        i64::from(self.ttl_minutes) * 60_000
    }
}

/// A wallet signature: the signing key and the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSignature {
    pub public_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

/// The wallet-signing collaborator.
///
/// `sign` may prompt a human and may be declined.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The account this wallet signs for.
    fn account(&self) -> AccountAddress;

    /// Sign a personal message.
    async fn sign(&self, message: &[u8]) -> std::result::Result<WalletSignature, SignError>;
}

/// The canonical challenge a wallet signs to open a session.
pub fn challenge_message(
    app_id: &ObjectId,
    ttl_minutes: u32,
    created_at_ms: i64,
    session_key: &Ed25519PublicKey,
) -> Vec<u8> {
    format!(
        "Accessing keys of application {app_id} for {ttl_minutes} mins from {created_at_ms}, \
         session key: {}",
        session_key.to_hex()
    )
    .into_bytes()
}

/// The message a session key signs for one key request.
pub fn request_message(tx_bytes: &[u8], enc_key: &X25519PublicKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(tx_bytes.len() + 32);
    out.extend_from_slice(tx_bytes);
    out.extend_from_slice(enc_key.as_bytes());
    out
}

/// The public part of a session credential, presented to key servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub account: AccountAddress,
    pub account_key: Ed25519PublicKey,
    pub app_id: ObjectId,
    pub created_at_ms: i64,
    pub ttl_minutes: u32,
    pub session_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

impl Certificate {
    pub fn expires_at_ms(&self) -> i64 {
        self.created_at_ms
            .saturating_add(i64::from(self.ttl_minutes) * 60_000)
    }

    /// Expired from the expiry instant onwards.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms()
    }

    /// Check the account binding and the wallet signature.
    pub fn verify_signature(&self) -> std::result::Result<(), String> {
        if self.account_key.address() != self.account {
            return Err("certificate key does not match its account".into());
        }
        let message = challenge_message(
            &self.app_id,
            self.ttl_minutes,
            self.created_at_ms,
            &self.session_key,
        );
        self.account_key
            .verify(&message, &self.signature)
            .map_err(|_| "certificate signature is invalid".to_string())
    }
}

/// A live session credential.
pub struct SessionCredential {
    certificate: Certificate,
    session_key: Keypair,
    enc_secret: X25519StaticSecret,
}

impl SessionCredential {
    pub fn account(&self) -> AccountAddress {
        self.certificate.account
    }

    pub fn app_id(&self) -> ObjectId {
        self.certificate.app_id
    }

    pub fn created_at_ms(&self) -> i64 {
        self.certificate.created_at_ms
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.certificate.expires_at_ms()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.certificate.is_expired(now_ms)
    }

    /// Usable for `account` at `now_ms`.
    pub fn is_valid_for(&self, account: &AccountAddress, now_ms: i64) -> bool {
        &self.certificate.account == account && !self.is_expired(now_ms)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The session's Ed25519 verifying key. Unique per credential.
    pub fn session_public_key(&self) -> Ed25519PublicKey {
        self.session_key.public_key()
    }

    /// Public key that key servers seal responses to.
    pub fn enc_public(&self) -> X25519PublicKey {
        self.enc_secret.public_key()
    }

    pub(crate) fn enc_secret(&self) -> &X25519StaticSecret {
        &self.enc_secret
    }

    /// Sign a key request.
    pub fn sign_request(&self, tx_bytes: &[u8], enc_key: &X25519PublicKey) -> Ed25519Signature {
        self.session_key.sign(&request_message(tx_bytes, enc_key))
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("account", &self.certificate.account)
            .field("created_at_ms", &self.certificate.created_at_ms)
            .field("ttl_minutes", &self.certificate.ttl_minutes)
            .field("session_key", &self.session_key.public_key())
            .finish()
    }
}

/// Owns the single-slot credential cache.
pub struct CredentialManager {
    config: CredentialConfig,
    signer: Arc<dyn WalletSigner>,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<Arc<SessionCredential>>>,
}

impl CredentialManager {
    pub fn new(config: CredentialConfig, signer: Arc<dyn WalletSigner>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            signer,
            clock,
            slot: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Return the cached credential for `account`, or create one.
    ///
    /// Creation prompts the wallet exactly once. The slot stays locked
    /// across the prompt, so concurrent replacements serialize and the last
    /// one wins.
    pub async fn get_or_create(&self, account: &AccountAddress) -> Result<Arc<SessionCredential>> {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now_millis();

        if let Some(existing) = slot.as_ref() {
            if existing.is_valid_for(account, now) {
                debug!(%account, "reusing session credential");
                return Ok(Arc::clone(existing));
            }
            debug!(
                %account,
                cached_account = %existing.account(),
                expired = existing.is_expired(now),
                "discarding session credential"
            );
        }
        *slot = None;

        let session_key = Keypair::generate();
        let enc_secret = X25519StaticSecret::generate();
        let message = challenge_message(
            &self.config.app_id,
            self.config.ttl_minutes,
            now,
            &session_key.public_key(),
        );

        let signed = match self.signer.sign(&message).await {
            Ok(signed) => signed,
            Err(SignError::Declined) => {
                info!(%account, "session signature declined");
                return Err(AccessError::SignatureDeclined);
            }
            Err(SignError::Failed(reason)) => {
                warn!(%account, %reason, "wallet failed to sign");
                return Err(AccessError::InvalidCredential(reason));
            }
        };

        if signed.public_key.address() != *account {
            return Err(AccessError::InvalidCredential(format!(
                "wallet signed as {} instead of {account}",
                signed.public_key.address()
            )));
        }
        signed
            .public_key
            .verify(&message, &signed.signature)
            .map_err(|_| AccessError::InvalidCredential("wallet signature is invalid".into()))?;

        let credential = Arc::new(SessionCredential {
            certificate: Certificate {
                account: *account,
                account_key: signed.public_key,
                app_id: self.config.app_id,
                created_at_ms: now,
                ttl_minutes: self.config.ttl_minutes,
                session_key: session_key.public_key(),
                signature: signed.signature,
            },
            session_key,
            enc_secret,
        });
        info!(
            %account,
            expires_at_ms = credential.expires_at_ms(),
            "created session credential"
        );

        *slot = Some(Arc::clone(&credential));
        Ok(credential)
    }

    /// The cached credential, if one is live.
    pub async fn current(&self) -> Option<Arc<SessionCredential>> {
        let slot = self.slot.lock().await;
        let now = self.clock.now_millis();
        slot.as_ref().filter(|c| !c.is_expired(now)).cloned()
    }

    /// Drop the cached credential.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            debug!("session credential invalidated");
        }
    }
}
