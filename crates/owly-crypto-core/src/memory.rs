//! Zero-on-drop holders for keys and decrypted payloads.
//!
//! Neither type implements `Clone`, and both print as `***` under `{:?}`.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Fill `out` from the OS CSPRNG.
pub(crate) fn fill_random(out: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(out)
        .map_err(|e| CryptoError::SecureMemory(format!("OS randomness unavailable: {e}")))
}

/// Heap bytes of any length: decrypted entry JSON, key-server masters.
pub struct SecretBuffer {
    inner: SecretSlice<u8>,
}

impl SecretBuffer {
    /// Copy `data` into a fresh secret allocation.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Adopt `data` without copying.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { inner: data.into() }
    }

    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBuffer[{}](***)", self.len())
    }
}

/// Inline key of exactly `N` bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> SecretBytes<N> {
    #[must_use]
    pub const fn new(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    /// A fresh random key.
    ///
    /// # Errors
    ///
    /// [`CryptoError::SecureMemory`] when the OS generator fails.
    pub fn random() -> Result<Self, CryptoError> {
        let mut key = Self::new([0u8; N]);
        fill_random(&mut key.bytes)?;
        Ok(key)
    }

    #[must_use]
    pub const fn expose(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Equality that inspects every byte regardless of where the first
    /// difference is.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        let diff = self
            .bytes
            .iter()
            .zip(&other.bytes)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0
    }
}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}
