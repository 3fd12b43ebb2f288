//! X25519 identity key wrapping for the identity-bound strategy.
//!
//! This module provides:
//! - [`derive_identity_keypair`]: key-release side: derive the per-identity
//!   X25519 key pair from a server master secret
//! - [`seal_to_identity`]: encrypting side: ephemeral ECDH against an
//!   identity public key, yielding a fresh AES key per blob
//! - [`open_for_identity`]: decrypting side: recover that AES key from a
//!   released identity secret and the blob's ephemeral public key
//!
//! All shared secrets pass through HKDF-SHA256 with the identity bytes in
//! the info string, so a key derived for one identity is useless for another.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use rand::rngs::OsRng;
use ring::hkdf;
use zeroize::Zeroize;

/// X25519 public key length in bytes (256 bits).
pub const X25519_PUBLIC_KEY_LEN: usize = 32;

/// Derived key length (AES-256 key or X25519 scalar).
const DERIVED_LEN: usize = 32;

/// HKDF salt for identity key derivation on the key-release side.
const IDENTITY_SALT: &[u8] = b"OWLY-IDENTITY-KEY-v1";

/// HKDF info prefix for per-blob wrapping keys.
const WRAP_INFO: &[u8] = b"OWLY-IDENTITY-WRAP-v1";

/// Marker type for `ring::hkdf::Prk::expand`, requesting 32-byte output.
struct HkdfLen32;

impl hkdf::KeyType for HkdfLen32 {
    fn len(&self) -> usize {
        DERIVED_LEN
    }
}

fn hkdf_expand(salt: &[u8], ikm: &[u8], info: &[&[u8]]) -> Result<[u8; DERIVED_LEN], CryptoError> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(ikm);
    let okm = prk
        .expand(info, HkdfLen32)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".into()))?;
    let mut out = [0u8; DERIVED_LEN];
    okm.fill(&mut out)
        .map_err(|_| CryptoError::KeyDerivation("HKDF fill failed".into()))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-identity X25519 key pair held by a key-release server.
pub struct IdentityKeyPair {
    /// X25519 secret scalar; released to a caller only after policy checks.
    pub secret: SecretBytes<DERIVED_LEN>,
    /// X25519 public key, used by encrypting clients.
    pub public: [u8; X25519_PUBLIC_KEY_LEN],
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityKeyPair(***)")
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Derive the X25519 key pair for `identity` from a server master secret.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` if HKDF fails.
pub fn derive_identity_keypair(
    master_secret: &[u8],
    identity: &[u8],
) -> Result<IdentityKeyPair, CryptoError> {
    let mut scalar = hkdf_expand(IDENTITY_SALT, master_secret, &[identity])?;
    let secret = x25519_dalek::StaticSecret::from(scalar);
    scalar.zeroize();
    let public = x25519_dalek::PublicKey::from(&secret);

    Ok(IdentityKeyPair {
        secret: SecretBytes::new(secret.to_bytes()),
        public: public.to_bytes(),
    })
}

/// Generate an ephemeral key and derive a wrapping key for `identity`.
///
/// Returns the ephemeral public key (stored as the envelope prefix) and the
/// AES-256 key to seal the payload with.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if the identity public key is a
/// low-order point.
pub fn seal_to_identity(
    identity_public: &[u8; X25519_PUBLIC_KEY_LEN],
    identity: &[u8],
) -> Result<([u8; X25519_PUBLIC_KEY_LEN], SecretBytes<DERIVED_LEN>), CryptoError> {
    let ephemeral = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
    let recipient = x25519_dalek::PublicKey::from(*identity_public);

    let shared = ephemeral.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKeyMaterial(
            "identity public key is a low-order point".into(),
        ));
    }

    let ephemeral_bytes = ephemeral_public.to_bytes();
    let mut key = hkdf_expand(
        &ephemeral_bytes,
        shared.as_bytes(),
        &[WRAP_INFO, identity_public, identity],
    )?;
    let wrapped = SecretBytes::new(key);
    key.zeroize();
    Ok((ephemeral_bytes, wrapped))
}

/// Recover the wrapping key for a blob from the released identity secret.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if the ephemeral public key is
/// a low-order point.
pub fn open_for_identity(
    identity_secret: &SecretBytes<DERIVED_LEN>,
    ephemeral_public: &[u8; X25519_PUBLIC_KEY_LEN],
    identity: &[u8],
) -> Result<SecretBytes<DERIVED_LEN>, CryptoError> {
    let secret = x25519_dalek::StaticSecret::from(*identity_secret.expose());
    let own_public = x25519_dalek::PublicKey::from(&secret).to_bytes();
    let peer = x25519_dalek::PublicKey::from(*ephemeral_public);

    let shared = secret.diffie_hellman(&peer);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKeyMaterial(
            "ephemeral public key is a low-order point".into(),
        ));
    }

    let mut key = hkdf_expand(
        ephemeral_public,
        shared.as_bytes(),
        &[WRAP_INFO, &own_public, identity],
    )?;
    let unwrapped = SecretBytes::new(key);
    key.zeroize();
    Ok(unwrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &[u8] = b"key-server-master-secret-for-tests";

    #[test]
    fn identity_keypair_is_deterministic() {
        let a = derive_identity_keypair(MASTER, &[1u8; 32]).unwrap();
        let b = derive_identity_keypair(MASTER, &[1u8; 32]).unwrap();
        assert_eq!(a.public, b.public);
        assert!(a.secret.ct_eq(&b.secret));
    }

    #[test]
    fn identities_get_distinct_keys() {
        let a = derive_identity_keypair(MASTER, &[1u8; 32]).unwrap();
        let b = derive_identity_keypair(MASTER, &[2u8; 32]).unwrap();
        assert_ne!(a.public, b.public);
    }

    #[test]
    fn seal_then_open_agrees_on_key() {
        let identity = [7u8; 32];
        let pair = derive_identity_keypair(MASTER, &identity).unwrap();
        let (ephemeral, sealing_key) = seal_to_identity(&pair.public, &identity).unwrap();
        let opening_key = open_for_identity(&pair.secret, &ephemeral, &identity).unwrap();
        assert!(sealing_key.ct_eq(&opening_key));
    }

    #[test]
    fn wrong_identity_secret_derives_different_key() {
        let identity = [7u8; 32];
        let pair = derive_identity_keypair(MASTER, &identity).unwrap();
        let other = derive_identity_keypair(MASTER, &[8u8; 32]).unwrap();
        let (ephemeral, sealing_key) = seal_to_identity(&pair.public, &identity).unwrap();
        let opening_key = open_for_identity(&other.secret, &ephemeral, &identity).unwrap();
        assert!(!sealing_key.ct_eq(&opening_key));
    }

    #[test]
    fn each_seal_uses_fresh_ephemeral_key() {
        let identity = [3u8; 32];
        let pair = derive_identity_keypair(MASTER, &identity).unwrap();
        let (e1, k1) = seal_to_identity(&pair.public, &identity).unwrap();
        let (e2, k2) = seal_to_identity(&pair.public, &identity).unwrap();
        assert_ne!(e1, e2);
        assert!(!k1.ct_eq(&k2));
    }

    #[test]
    fn low_order_public_key_is_rejected() {
        let err = seal_to_identity(&[0u8; 32], &[1u8; 32]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyMaterial(_)));
    }
}
