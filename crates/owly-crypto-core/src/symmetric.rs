//! AES-256-GCM authenticated encryption and the blob envelope layout.
//!
//! This module provides:
//! - [`encrypt`]: encrypt plaintext with a random nonce, returning [`SealedData`]
//! - [`decrypt`]: decrypt and authenticate [`SealedData`], returning [`SecretBuffer`]
//! - [`Envelope`]: `prefix || nonce || ciphertext || tag`, the byte layout
//!   uploaded to the blob store
//!
//! The prefix is strategy-specific: the 16-byte key salt for the local
//! password strategy, the 32-byte ephemeral X25519 public key for the
//! identity-bound strategy. It is always bound into the tag as AAD, so
//! swapping prefixes between blobs fails authentication.

use crate::error::CryptoError;
use crate::memory::{fill_random, SecretBuffer};
use ring::aead;
use zeroize::Zeroize;

/// AES-256-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// AES-256-GCM key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Authenticated ciphertext: nonce + ciphertext + tag.
#[must_use = "encrypted data must be stored or transmitted"]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedData {
    /// 96-bit random nonce, unique per encryption.
    pub nonce: [u8; NONCE_LEN],
    /// Encrypted data (same length as original plaintext).
    pub ciphertext: Vec<u8>,
    /// 128-bit authentication tag.
    pub tag: [u8; TAG_LEN],
}

/// Serialized blob: `prefix || nonce || ciphertext || tag`.
#[must_use = "envelopes must be uploaded or decrypted"]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Strategy-specific header (salt or ephemeral public key).
    pub prefix: Vec<u8>,
    /// Authenticated payload.
    pub sealed: SealedData,
}

impl Envelope {
    /// Serialize to the wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let capacity = self
            .prefix
            .len()
            .saturating_add(NONCE_LEN)
            .saturating_add(self.sealed.ciphertext.len())
            .saturating_add(TAG_LEN);
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(&self.sealed.nonce);
        out.extend_from_slice(&self.sealed.ciphertext);
        out.extend_from_slice(&self.sealed.tag);
        out
    }

    /// Parse the wire layout positionally, given the strategy's prefix length.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Envelope` if `bytes` is shorter than
    /// `prefix_len + NONCE_LEN + TAG_LEN`.
    pub fn from_bytes(bytes: &[u8], prefix_len: usize) -> Result<Self, CryptoError> {
        let min_len = prefix_len
            .saturating_add(NONCE_LEN)
            .saturating_add(TAG_LEN);
        if bytes.len() < min_len {
            return Err(CryptoError::Envelope(format!(
                "envelope too short: {} bytes (minimum {min_len})",
                bytes.len()
            )));
        }

        let (prefix, rest) = bytes.split_at(prefix_len);
        let (nonce_bytes, rest) = rest.split_at(NONCE_LEN);
        let ct_len = rest
            .len()
            .checked_sub(TAG_LEN)
            .ok_or_else(|| CryptoError::Envelope("envelope length underflow".into()))?;
        let (ciphertext, tag_bytes) = rest.split_at(ct_len);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            prefix: prefix.to_vec(),
            sealed: SealedData {
                nonce,
                ciphertext: ciphertext.to_vec(),
                tag,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Core encryption
// ---------------------------------------------------------------------------

fn aes_key(key: &[u8]) -> Result<aead::LessSafeKey, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::Encryption(format!(
            "invalid key length: {} bytes (expected {KEY_LEN})",
            key.len()
        )));
    }
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| CryptoError::Encryption("failed to create AES-256-GCM key".into()))?;
    Ok(aead::LessSafeKey::new(unbound))
}

/// Encrypt plaintext using AES-256-GCM with a random 96-bit nonce.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the key is not exactly 32 bytes or
/// sealing fails, `CryptoError::SecureMemory` if no nonce can be drawn.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<SealedData, CryptoError> {
    let key = aes_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    fill_random(&mut nonce_bytes)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    let Ok(tag) = key.seal_in_place_separate_tag(nonce, aead::Aad::from(aad), &mut in_out) else {
        in_out.zeroize();
        return Err(CryptoError::Encryption(
            "AES-256-GCM encryption failed".into(),
        ));
    };

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok(SealedData {
        nonce: nonce_bytes,
        ciphertext: in_out,
        tag: tag_bytes,
    })
}

/// Decrypt AES-256-GCM authenticated ciphertext into a [`SecretBuffer`].
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the key is not exactly 32 bytes.
/// Returns `CryptoError::Decryption` if authentication fails (tampered data,
/// wrong key, or wrong AAD). No plaintext is ever returned in that case.
pub fn decrypt(sealed: &SealedData, key: &[u8], aad: &[u8]) -> Result<SecretBuffer, CryptoError> {
    let key = aes_key(key)?;
    let nonce = aead::Nonce::assume_unique_for_key(sealed.nonce);

    let mut ct_tag = Vec::with_capacity(sealed.ciphertext.len().saturating_add(TAG_LEN));
    ct_tag.extend_from_slice(&sealed.ciphertext);
    ct_tag.extend_from_slice(&sealed.tag);

    let result = key
        .open_in_place(nonce, aead::Aad::from(aad), &mut ct_tag)
        .map(|plaintext| SecretBuffer::new(plaintext));
    ct_tag.zeroize();
    result.map_err(|_| CryptoError::Decryption)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
