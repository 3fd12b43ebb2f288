//! `owly-crypto-core`: pure cryptographic primitives for Owly.
//!
//! This crate is the audit target: zero network, zero async, zero storage
//! dependencies. Everything that touches a remote collaborator lives in
//! `owly-vault`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod kdf;
pub mod symmetric;

pub mod kem;

pub mod signing;

pub mod password;

pub use error::CryptoError;
pub use kdf::{derive, identity_salt, Pbkdf2Params, DEFAULT_ITERATIONS, MIN_ITERATIONS, SALT_LEN};
pub use kem::{
    derive_identity_keypair, open_for_identity, seal_to_identity, IdentityKeyPair,
    X25519_PUBLIC_KEY_LEN,
};
pub use memory::{SecretBuffer, SecretBytes};
pub use password::{
    generate_password, password_strength, DEFAULT_PASSWORD_LENGTH, MAX_STRENGTH, PASSWORD_CHARSET,
};
pub use signing::{verify, SigningKeyPair, ED25519_PUBLIC_KEY_LEN, ED25519_SIGNATURE_LEN};
pub use symmetric::{decrypt, encrypt, Envelope, SealedData, KEY_LEN, NONCE_LEN, TAG_LEN};
