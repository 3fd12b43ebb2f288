//! Cryptographic error types for `owly-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed (PBKDF2 parameter validation, HKDF expansion).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Symmetric encryption failure (AES-256-GCM setup or sealing).
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Authentication tag verification failed: ciphertext tampered or wrong key.
    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    /// Invalid key material (wrong length, corrupted bytes, wrong capability kind).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Digital signature creation or verification failure.
    #[error("signature error: {0}")]
    Signature(String),

    /// Secret memory allocation or CSPRNG failure.
    #[error("secure memory error: {0}")]
    SecureMemory(String),

    /// Password generation failure (invalid parameters).
    #[error("password generation error: {0}")]
    PasswordGeneration(String),

    /// Encrypted blob envelope is malformed (truncated, wrong prefix length).
    #[error("malformed envelope: {0}")]
    Envelope(String),
}
