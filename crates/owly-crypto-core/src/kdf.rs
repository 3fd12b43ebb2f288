//! PBKDF2-HMAC-SHA256 key derivation for the local password strategy.
//!
//! This module provides:
//! - [`derive`]: derive a 256-bit key from a password + salt
//! - [`identity_salt`]: deterministic, domain-separated salt from an account identity
//! - [`Pbkdf2Params`]: serializable iteration count
//!
//! # Deterministic salt
//!
//! The salt is derived from the account's public identity, so the same
//! password + identity pair always reproduces the same key and nothing
//! needs to be stored to unlock. The domain tag keeps this salt distinct
//! from any other hash of the same identity.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Output length of the KDF in bytes (256 bits).
pub const OUTPUT_LEN: usize = 32;

/// Salt length in bytes, also the salt prefix length of a local envelope.
pub const SALT_LEN: usize = 16;

/// Iteration floor accepted by configuration validation.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Default iteration count for new vaults.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Domain separation tag mixed into [`identity_salt`].
const SALT_DOMAIN: &[u8] = b"owly/vault-key/v1\0";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// PBKDF2 parameter set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pbkdf2Params {
    /// Number of HMAC-SHA256 iterations.
    pub iterations: u32,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

// ---------------------------------------------------------------------------
// Core KDF
// ---------------------------------------------------------------------------

/// Derive the deterministic salt for an account identity.
///
/// `SHA-256(domain || identity)` truncated to [`SALT_LEN`] bytes.
#[must_use]
pub fn identity_salt(identity: &[u8]) -> [u8; SALT_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(SALT_DOMAIN);
    hasher.update(identity);
    let digest = hasher.finalize();

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&digest[..SALT_LEN]);
    salt
}

/// Derive a 256-bit key from a password and salt using PBKDF2-HMAC-SHA256.
///
/// Password policy (minimum length, rotation rules) is enforced by the
/// vault layer; any password, including an empty one, is accepted here.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` if the salt is shorter than
/// [`SALT_LEN`] bytes or the iteration count is zero.
pub fn derive(
    password: &[u8],
    salt: &[u8],
    params: &Pbkdf2Params,
) -> Result<SecretBytes<OUTPUT_LEN>, CryptoError> {
    if salt.len() < SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt too short: {} bytes (minimum {SALT_LEN})",
            salt.len()
        )));
    }
    if params.iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "iteration count must be non-zero".into(),
        ));
    }

    let mut output = [0u8; OUTPUT_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, params.iterations, &mut output);

    let key = SecretBytes::new(output);
    output.zeroize();
    Ok(key)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
