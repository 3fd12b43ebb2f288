//! Ed25519 signatures for account identities.
//!
//! The vault never holds the account's signing key in production; a wallet
//! signs challenges and ledger transactions. This module provides the
//! verification side used by collaborators, plus [`SigningKeyPair`] for
//! local wallets and test fixtures.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use ring::signature::{self, Ed25519KeyPair, KeyPair};

/// Ed25519 public key length in bytes (256 bits).
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 seed (private key) length in bytes (256 bits).
pub const ED25519_SEED_LEN: usize = 32;

/// Ed25519 signature length in bytes (512 bits).
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// Ed25519 key pair built from a secret seed.
pub struct SigningKeyPair {
    seed: SecretBytes<ED25519_SEED_LEN>,
    public: [u8; ED25519_PUBLIC_KEY_LEN],
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Generate a fresh key pair from a CSPRNG seed.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SecureMemory` if the CSPRNG fails, or
    /// `CryptoError::Signature` if ring rejects the seed.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::from_seed(SecretBytes::random()?)
    }

    /// Rebuild a key pair from a stored seed.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` if ring rejects the seed.
    pub fn from_seed(seed: SecretBytes<ED25519_SEED_LEN>) -> Result<Self, CryptoError> {
        let pair = Ed25519KeyPair::from_seed_unchecked(seed.expose())
            .map_err(|_| CryptoError::Signature("invalid Ed25519 seed".into()))?;
        let mut public = [0u8; ED25519_PUBLIC_KEY_LEN];
        public.copy_from_slice(pair.public_key().as_ref());
        Ok(Self { seed, public })
    }

    /// The public key bytes.
    #[must_use]
    pub const fn public_key(&self) -> &[u8; ED25519_PUBLIC_KEY_LEN] {
        &self.public
    }

    /// Sign `message`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` if the seed can no longer be loaded.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; ED25519_SIGNATURE_LEN], CryptoError> {
        let pair = Ed25519KeyPair::from_seed_unchecked(self.seed.expose())
            .map_err(|_| CryptoError::Signature("invalid Ed25519 seed".into()))?;
        let sig = pair.sign(message);
        let mut out = [0u8; ED25519_SIGNATURE_LEN];
        out.copy_from_slice(sig.as_ref());
        Ok(out)
    }
}

/// Verify an Ed25519 signature.
///
/// # Errors
///
/// Returns `CryptoError::Signature` if the public key or signature has the
/// wrong length, or the signature does not verify.
pub fn verify(public_key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
    if public_key.len() != ED25519_PUBLIC_KEY_LEN {
        return Err(CryptoError::Signature(format!(
            "invalid public key length: {} bytes (expected {ED25519_PUBLIC_KEY_LEN})",
            public_key.len()
        )));
    }
    if sig.len() != ED25519_SIGNATURE_LEN {
        return Err(CryptoError::Signature(format!(
            "invalid signature length: {} bytes (expected {ED25519_SIGNATURE_LEN})",
            sig.len()
        )));
    }
    signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
        .verify(message, sig)
        .map_err(|_| CryptoError::Signature("signature verification failed".into()))
}
