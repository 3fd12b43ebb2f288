//! Entry encryption strategies.
//!
//! A [`CryptoEngine`] turns an [`UnlockProof`] into a [`Capability`] and
//! uses that capability to seal and open entries. Two strategies exist:
//!
//! - [`LocalKeyEngine`]: password-derived AES key, PBKDF2 salted by owner
//! - [`IdentityBoundEngine`]: per-blob keys wrapped to the owner identity,
//!   released by threshold key servers after an on-ledger access check
//!
//! Both produce blobs with the same outer layout,
//! `prefix || nonce || ciphertext || tag`, where the prefix is bound as AAD.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use owly_crypto_core::SecretBytes;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::config::{StrategyConfig, VaultConfig};
use crate::entries::VaultEntry;
use crate::error::VaultError;
use crate::identity::OwnerAddress;
use crate::store::LedgerRecord;

mod identity;
mod local;

pub use identity::{
    AccessProof, Challenge, IdentityBoundEngine, IdentitySession, IdentityToken,
    KeyReleaseService, SignedChallenge,
};
pub use local::LocalKeyEngine;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which protection strategy a vault uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Local,
    IdentityBound,
}

/// Password-derived symmetric key.
pub struct LocalKey {
    key: SecretBytes<32>,
}

impl LocalKey {
    pub(crate) const fn new(key: SecretBytes<32>) -> Self {
        Self { key }
    }

    pub(crate) const fn key(&self) -> &SecretBytes<32> {
        &self.key
    }
}

/// Proof of authorization held by a live session.
///
/// Dropping a capability zeroizes any key material it owns.
pub enum Capability {
    Local(LocalKey),
    Identity(IdentitySession),
}

impl Capability {
    /// Strategy this capability belongs to.
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        match self {
            Self::Local(_) => Strategy::Local,
            Self::Identity(_) => Strategy::IdentityBound,
        }
    }

    /// Absolute expiry in Unix seconds, if the capability is time-boxed.
    #[must_use]
    pub const fn expires_at(&self) -> Option<u64> {
        match self {
            Self::Local(_) => None,
            Self::Identity(session) => Some(session.expires_at),
        }
    }

    /// Whether two capabilities authorize the same keys.
    ///
    /// Local keys are compared in constant time.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Local(a), Self::Local(b)) => a.key.ct_eq(&b.key),
            (Self::Identity(a), Self::Identity(b)) => a.identity == b.identity,
            _ => false,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Capability::Local(***)"),
            Self::Identity(session) => f
                .debug_struct("Capability::Identity")
                .field("identity", &session.identity)
                .field("expires_at", &session.expires_at)
                .finish_non_exhaustive(),
        }
    }
}

/// Credential presented at unlock or rotation time.
pub enum UnlockProof {
    /// Master password (local strategy).
    Password(Zeroizing<String>),
    /// Wallet signature over a key-server challenge (identity strategy).
    SignedChallenge(SignedChallenge),
}

impl UnlockProof {
    /// Wrap a password.
    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(Zeroizing::new(password.into()))
    }
}

impl fmt::Debug for UnlockProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("UnlockProof::Password(***)"),
            Self::SignedChallenge(signed) => f
                .debug_tuple("UnlockProof::SignedChallenge")
                .field(&signed.challenge.identity)
                .finish(),
        }
    }
}

/// Serialized encrypted entry, as stored in the blob store.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBlob({} bytes)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Entry sealing strategy bound to one owner.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Strategy implemented by this engine.
    fn strategy(&self) -> Strategy;

    /// Owner whose entries this engine seals.
    fn owner(&self) -> &OwnerAddress;

    /// Fetch a challenge for the owner to sign.
    ///
    /// # Errors
    ///
    /// [`VaultError::Unsupported`] unless the strategy authenticates with a
    /// signed challenge.
    async fn request_challenge(&self) -> Result<Challenge, VaultError> {
        Err(VaultError::Unsupported(
            "this vault unlocks with a password".into(),
        ))
    }

    /// Exchange a proof for a capability.
    async fn establish(&self, proof: UnlockProof) -> Result<Capability, VaultError>;

    /// Seal an entry. Output is never deterministic.
    async fn encrypt(
        &self,
        entry: &VaultEntry,
        capability: &Capability,
    ) -> Result<EncryptedBlob, VaultError>;

    /// Open a blob. Fails closed with [`VaultError::Decrypt`]; never returns
    /// partial content.
    async fn decrypt(
        &self,
        blob: &EncryptedBlob,
        capability: &Capability,
        record: &LedgerRecord,
    ) -> Result<VaultEntry, VaultError>;
}

/// Build the engine selected by `config`.
///
/// # Errors
///
/// Returns [`VaultError::InvalidRequest`] for an invalid config, or when
/// the identity strategy has fewer key servers than its threshold.
pub fn build_engine(
    config: &VaultConfig,
    owner: OwnerAddress,
    key_servers: Vec<Arc<dyn KeyReleaseService>>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CryptoEngine>, VaultError> {
    config.validate()?;
    match &config.strategy {
        StrategyConfig::Local { iterations } => {
            Ok(Arc::new(LocalKeyEngine::with_iterations(owner, *iterations)))
        }
        StrategyConfig::IdentityBound {
            threshold,
            ttl_minutes,
        } => Ok(Arc::new(IdentityBoundEngine::new(
            owner,
            config.contract.clone(),
            key_servers,
            *threshold,
            *ttl_minutes,
            clock,
        )?)),
    }
}
