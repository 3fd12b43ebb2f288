//! Identity-bound key strategy.
//!
//! Each blob is sealed under a fresh X25519 ephemeral key agreed with the
//! owner's identity public key. The matching identity secret never lives
//! on the client between operations: it is released per decryption by key
//! servers, and only after they evaluate a simulate-only `seal_approve`
//! call proving the caller owns the ledger record.
//!
//! Key servers are replicas of one committee. `threshold` of them must
//! answer, and their answers must agree, before any key is used.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use owly_crypto_core::kem::{self, X25519_PUBLIC_KEY_LEN};
use owly_crypto_core::signing;
use owly_crypto_core::symmetric::{self, Envelope};
use owly_crypto_core::SecretBytes;
use serde::{Deserialize, Serialize};

use super::{Capability, CryptoEngine, EncryptedBlob, Strategy, UnlockProof};
use crate::clock::Clock;
use crate::config::ContractConfig;
use crate::entries::VaultEntry;
use crate::error::{StoreError, VaultError};
use crate::identity::OwnerAddress;
use crate::store::{LedgerRecord, PersonalSignature, RecordId};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Session challenge issued by a key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub identity: OwnerAddress,
    pub package_id: String,
    /// Unix seconds.
    pub issued_at: u64,
    pub ttl_minutes: u32,
    /// Hex-encoded random nonce.
    pub nonce: String,
}

impl Challenge {
    /// Message the owner's wallet signs.
    #[must_use]
    pub fn message(&self) -> Vec<u8> {
        format!(
            "Owly requests access to {package} for account {identity}.\n\
             Issued at: {issued}\nValid for: {ttl} minutes\nNonce: {nonce}",
            package = self.package_id,
            identity = self.identity,
            issued = self.issued_at,
            ttl = self.ttl_minutes,
            nonce = self.nonce,
        )
        .into_bytes()
    }

    /// Unix seconds after which a session built on this challenge is dead.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        let ttl_secs = u64::from(self.ttl_minutes).saturating_mul(60);
        self.issued_at.saturating_add(ttl_secs)
    }
}

/// A challenge signed by the owner's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedChallenge {
    pub challenge: Challenge,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedChallenge {
    /// Attach a wallet signature to a challenge.
    #[must_use]
    pub fn new(challenge: Challenge, signature: PersonalSignature) -> Self {
        Self {
            challenge,
            public_key: signature.public_key,
            signature: signature.signature,
        }
    }

    /// Check key ownership of the identity and the signature itself.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] on mismatch.
    pub fn verify(&self) -> Result<(), StoreError> {
        if OwnerAddress::from_public_key(&self.public_key) != self.challenge.identity {
            return Err(StoreError::Rejected(
                "signing key does not own the challenged identity".into(),
            ));
        }
        signing::verify(&self.public_key, &self.challenge.message(), &self.signature)
            .map_err(|_| StoreError::Rejected("invalid challenge signature".into()))
    }
}

/// Opaque, time-boxed token issued by one key server.
///
/// Holds no part of the signed challenge it was exchanged for. `tag` is a
/// MAC only servers sharing the issuer's master secret can check.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken {
    pub server_id: String,
    pub identity: OwnerAddress,
    pub issued_at: u64,
    pub expires_at: u64,
    pub tag: Vec<u8>,
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("server_id", &self.server_id)
            .field("identity", &self.identity)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// The tokens a quorum of key servers issued for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentitySession {
    pub identity: OwnerAddress,
    /// Earliest expiry among the tokens.
    pub expires_at: u64,
    tokens: Vec<IdentityToken>,
}

impl IdentitySession {
    fn token_for(&self, server_id: &str) -> Option<&IdentityToken> {
        self.tokens.iter().find(|t| t.server_id == server_id)
    }
}

/// Simulate-only `seal_approve` call evaluated by key servers.
///
/// `key_id` is the owner's address bytes; the record is the entry being
/// opened. Never submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessProof {
    pub sender: OwnerAddress,
    pub target: String,
    pub key_id: Vec<u8>,
    pub record_id: RecordId,
}

impl AccessProof {
    #[must_use]
    pub fn seal_approve(contract: &ContractConfig, owner: &OwnerAddress, record_id: &RecordId) -> Self {
        Self {
            sender: *owner,
            target: format!(
                "{}::{}::seal_approve",
                contract.package_id, contract.module_name
            ),
            key_id: owner.as_bytes().to_vec(),
            record_id: record_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Key server seam
// ---------------------------------------------------------------------------

/// Remote key-release server.
#[async_trait]
pub trait KeyReleaseService: Send + Sync {
    /// Stable identifier for logs.
    fn server_id(&self) -> &str;

    /// Issue a challenge for `identity`, valid for `ttl_minutes` once signed.
    async fn request_challenge(
        &self,
        identity: &OwnerAddress,
        ttl_minutes: u32,
    ) -> Result<Challenge, StoreError>;

    /// Validate a signed challenge and issue a token.
    async fn release_capability(&self, signed: &SignedChallenge) -> Result<IdentityToken, StoreError>;

    /// Public key encrypting clients seal to.
    async fn identity_public_key(
        &self,
        identity: &OwnerAddress,
    ) -> Result<[u8; X25519_PUBLIC_KEY_LEN], StoreError>;

    /// Release the identity secret if the token is live and the access
    /// proof passes the on-ledger policy.
    async fn release_identity_key(
        &self,
        token: &IdentityToken,
        proof: &AccessProof,
    ) -> Result<SecretBytes<32>, StoreError>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Identity-bound strategy for one owner.
pub struct IdentityBoundEngine {
    owner: OwnerAddress,
    contract: ContractConfig,
    servers: Vec<Arc<dyn KeyReleaseService>>,
    threshold: usize,
    ttl_minutes: u32,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for IdentityBoundEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityBoundEngine")
            .field("owner", &self.owner)
            .field("servers", &self.servers.len())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Tally of key-server answers that did not succeed.
#[derive(Default)]
struct Refusals {
    rejected: usize,
    expired: bool,
    unavailable: Vec<String>,
}

impl Refusals {
    fn record(&mut self, server: &str, err: StoreError) {
        tracing::warn!(server, "key server refused: {err}");
        match err {
            StoreError::Expired => self.expired = true,
            StoreError::Rejected(_) | StoreError::NotFound(_) => {
                self.rejected = self.rejected.saturating_add(1);
            }
            StoreError::Unavailable(msg) => self.unavailable.push(msg),
        }
    }
}

impl IdentityBoundEngine {
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidRequest`] if `threshold` is zero or
    /// exceeds the number of servers.
    pub fn new(
        owner: OwnerAddress,
        contract: ContractConfig,
        servers: Vec<Arc<dyn KeyReleaseService>>,
        threshold: usize,
        ttl_minutes: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, VaultError> {
        if threshold == 0 || threshold > servers.len() {
            return Err(VaultError::InvalidRequest(format!(
                "key server threshold {threshold} cannot be met by {} servers",
                servers.len()
            )));
        }
        Ok(Self {
            owner,
            contract,
            servers,
            threshold,
            ttl_minutes,
            clock,
        })
    }

    fn live_session<'a>(&self, capability: &'a Capability) -> Result<&'a IdentitySession, VaultError> {
        let Capability::Identity(session) = capability else {
            return Err(VaultError::InvalidRequest(
                "password capability used with an identity-bound vault".into(),
            ));
        };
        if session.identity != self.owner {
            return Err(VaultError::InvalidRequest(
                "capability belongs to another identity".into(),
            ));
        }
        if self.clock.now_secs() >= session.expires_at {
            return Err(VaultError::SessionExpired);
        }
        Ok(session)
    }

    fn shortfall(&self, refusals: Refusals, got: usize, rejected_as: VaultError) -> VaultError {
        if refusals.expired {
            VaultError::SessionExpired
        } else if refusals.rejected > 0 {
            rejected_as
        } else {
            VaultError::Store(format!(
                "{got} of {} required key servers answered: {}",
                self.threshold,
                refusals.unavailable.join("; ")
            ))
        }
    }

    async fn quorum_public_key(&self) -> Result<[u8; X25519_PUBLIC_KEY_LEN], VaultError> {
        let answers = join_all(
            self.servers
                .iter()
                .map(|server| server.identity_public_key(&self.owner)),
        )
        .await;

        let mut refusals = Refusals::default();
        let mut agreed: Option<[u8; X25519_PUBLIC_KEY_LEN]> = None;
        let mut count = 0usize;
        for (server, answer) in self.servers.iter().zip(answers) {
            match answer {
                Ok(key) => {
                    if agreed.is_some_and(|k| k != key) {
                        tracing::warn!(server = server.server_id(), "key servers disagree on identity key");
                        return Err(VaultError::Store("key servers disagree".into()));
                    }
                    agreed = Some(key);
                    count = count.saturating_add(1);
                }
                Err(err) => refusals.record(server.server_id(), err),
            }
        }

        match agreed {
            Some(key) if count >= self.threshold => Ok(key),
            _ => Err(self.shortfall(
                refusals,
                count,
                VaultError::Store("key servers refused to publish the identity key".into()),
            )),
        }
    }

    async fn quorum_identity_secret(
        &self,
        session: &IdentitySession,
        proof: &AccessProof,
    ) -> Result<SecretBytes<32>, VaultError> {
        let answers = join_all(self.servers.iter().map(|server| async move {
            match session.token_for(server.server_id()) {
                Some(token) => server.release_identity_key(token, proof).await,
                None => Err(StoreError::Unavailable(format!(
                    "no session token from {}",
                    server.server_id()
                ))),
            }
        }))
        .await;

        let mut refusals = Refusals::default();
        let mut agreed: Option<SecretBytes<32>> = None;
        let mut count = 0usize;
        for (server, answer) in self.servers.iter().zip(answers) {
            match answer {
                Ok(secret) => {
                    if let Some(prev) = &agreed {
                        if !prev.ct_eq(&secret) {
                            tracing::warn!(server = server.server_id(), "key servers released different keys");
                            return Err(VaultError::Decrypt);
                        }
                    } else {
                        agreed = Some(secret);
                    }
                    count = count.saturating_add(1);
                }
                Err(err) => refusals.record(server.server_id(), err),
            }
        }

        match agreed {
            Some(secret) if count >= self.threshold => Ok(secret),
            _ => Err(self.shortfall(refusals, count, VaultError::Decrypt)),
        }
    }
}

#[async_trait]
impl CryptoEngine for IdentityBoundEngine {
    fn strategy(&self) -> Strategy {
        Strategy::IdentityBound
    }

    fn owner(&self) -> &OwnerAddress {
        &self.owner
    }

    async fn request_challenge(&self) -> Result<Challenge, VaultError> {
        let mut last = StoreError::Unavailable("no key servers configured".into());
        for server in &self.servers {
            match server.request_challenge(&self.owner, self.ttl_minutes).await {
                Ok(challenge) if challenge.identity == self.owner => return Ok(challenge),
                Ok(_) => {
                    last = StoreError::Rejected("challenge issued for another identity".into());
                }
                Err(err) => {
                    tracing::warn!(server = server.server_id(), "challenge request failed: {err}");
                    last = err;
                }
            }
        }
        Err(last.into())
    }

    async fn establish(&self, proof: UnlockProof) -> Result<Capability, VaultError> {
        let UnlockProof::SignedChallenge(signed) = proof else {
            return Err(VaultError::Unsupported(
                "this vault unlocks with a wallet signature".into(),
            ));
        };
        if signed.challenge.identity != self.owner {
            return Err(VaultError::AuthFailure);
        }

        let answers = join_all(
            self.servers
                .iter()
                .map(|server| server.release_capability(&signed)),
        )
        .await;

        let mut refusals = Refusals::default();
        let mut tokens = Vec::new();
        for (server, answer) in self.servers.iter().zip(answers) {
            match answer {
                Ok(token) if token.identity == self.owner && token.server_id == server.server_id() => {
                    tokens.push(token);
                }
                Ok(_) => refusals.record(
                    server.server_id(),
                    StoreError::Rejected("token issued for another identity".into()),
                ),
                Err(err) => refusals.record(server.server_id(), err),
            }
        }

        if tokens.len() < self.threshold {
            return Err(self.shortfall(refusals, tokens.len(), VaultError::AuthFailure));
        }

        // The session lives only as long as the shortest-lived token.
        let Some(expires_at) = tokens.iter().map(|t| t.expires_at).min() else {
            return Err(VaultError::AuthFailure);
        };
        tracing::info!(
            identity = %self.owner,
            expires_at,
            servers = tokens.len(),
            "identity session established"
        );
        Ok(Capability::Identity(IdentitySession {
            identity: self.owner,
            expires_at,
            tokens,
        }))
    }

    async fn encrypt(
        &self,
        entry: &VaultEntry,
        capability: &Capability,
    ) -> Result<EncryptedBlob, VaultError> {
        self.live_session(capability)?;
        let identity_public = self.quorum_public_key().await?;
        let (ephemeral_public, key) =
            kem::seal_to_identity(&identity_public, self.owner.as_bytes())?;

        let plaintext = entry.to_plaintext()?;
        let sealed = symmetric::encrypt(plaintext.expose(), key.expose(), &ephemeral_public)?;
        let envelope = Envelope {
            prefix: ephemeral_public.to_vec(),
            sealed,
        };
        Ok(EncryptedBlob::from_bytes(envelope.to_bytes()))
    }

    async fn decrypt(
        &self,
        blob: &EncryptedBlob,
        capability: &Capability,
        record: &LedgerRecord,
    ) -> Result<VaultEntry, VaultError> {
        let session = self.live_session(capability)?;
        let envelope = Envelope::from_bytes(blob.as_bytes(), X25519_PUBLIC_KEY_LEN)
            .map_err(|_| VaultError::Decrypt)?;
        let ephemeral_public: [u8; X25519_PUBLIC_KEY_LEN] = envelope
            .prefix
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::Decrypt)?;

        let proof = AccessProof::seal_approve(&self.contract, &self.owner, &record.id);
        let identity_secret = self.quorum_identity_secret(session, &proof).await?;
        let key = kem::open_for_identity(&identity_secret, &ephemeral_public, self.owner.as_bytes())
            .map_err(|_| VaultError::Decrypt)?;

        let plaintext = symmetric::decrypt(&envelope.sealed, key.expose(), &envelope.prefix)
            .map_err(|_| VaultError::Decrypt)?;
        VaultEntry::from_plaintext(&plaintext)
    }
}
