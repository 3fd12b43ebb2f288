//! `owly-vault`: session and multi-store consistency engine for Owly.
//!
//! Encrypted entries live in a content-addressed blob store; an
//! append-only ledger maps each owner to their blobs. This crate keeps the
//! two consistent under partial failure, holds the key material of a live
//! session, and locks it after inactivity.
//!
//! Start from [`Vault`]: open it with a [`VaultConfig`] and a set of
//! [`VaultServices`], unlock with an [`UnlockProof`], then create, read,
//! update and delete entries.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod clock;
pub mod config;
pub mod engine;
pub mod entries;
pub mod error;
pub mod identity;
pub mod store;

pub mod orchestrator;
pub mod rotation;
pub mod session;

pub mod demo_store;
pub mod in_memory;

pub mod vault;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ContractConfig, Network, StrategyConfig, VaultConfig, AUTO_LOCK_PRESETS};
pub use engine::{
    Capability, Challenge, CryptoEngine, EncryptedBlob, IdentityBoundEngine, KeyReleaseService,
    LocalKeyEngine, SignedChallenge, Strategy, UnlockProof,
};
pub use entries::{Category, EntryPayload, VaultEntry};
pub use error::{StoreError, VaultError};
pub use identity::OwnerAddress;
pub use orchestrator::{
    ListedEntry, OrphanCleanupReport, SupersededRecord, UpdateOutcome, VaultItemOrchestrator,
};
pub use rotation::{PasswordRotationWorkflow, RotationReport, RotationState};
pub use session::{LockStatus, SessionInfo, SessionManager, SessionPhase};
pub use store::{
    BlobId, BlobStore, Ledger, LedgerRecord, LocalWallet, RecordId, TransactionSigner,
};
pub use vault::{Vault, VaultServices};

pub use owly_crypto_core::{generate_password, password_strength};
