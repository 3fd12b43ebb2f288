#![allow(clippy::unwrap_used, dead_code)]

//! Shared fixtures for integration tests.

use std::sync::Arc;

use owly_vault::engine::LocalKeyEngine;
use owly_vault::in_memory::{MemoryBlobStore, MemoryLedger};
use owly_vault::{
    ContractConfig, EntryPayload, LocalWallet, ManualClock, TransactionSigner, UnlockProof, Vault,
    VaultConfig, VaultServices,
};

/// Cheap PBKDF2 cost for tests.
pub const TEST_ITERATIONS: u32 = 1_000;

pub const START: u64 = 1_700_000_000;

pub const PASSWORD: &str = "correct horse battery";

pub fn contract() -> ContractConfig {
    ContractConfig {
        package_id: "0xfeed".into(),
        module_name: "vault".into(),
    }
}

pub struct LocalHarness {
    pub clock: Arc<ManualClock>,
    pub blobs: Arc<MemoryBlobStore>,
    pub ledger: Arc<MemoryLedger>,
    pub wallet: Arc<LocalWallet>,
    pub vault: Vault,
}

impl LocalHarness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let blobs = Arc::new(MemoryBlobStore::new());
        let ledger = Arc::new(MemoryLedger::new(contract(), clock.clone()));
        let wallet = Arc::new(LocalWallet::generate().unwrap());
        let vault = Self::vault_over(&clock, &blobs, &ledger, &wallet);
        Self {
            clock,
            blobs,
            ledger,
            wallet,
            vault,
        }
    }

    /// A second vault handle over the same stores (a fresh app launch).
    pub fn reopen(&self) -> Vault {
        Self::vault_over(&self.clock, &self.blobs, &self.ledger, &self.wallet)
    }

    /// A vault for a different wallet over the same stores.
    pub fn stranger(&self) -> Vault {
        let wallet = Arc::new(LocalWallet::generate().unwrap());
        Self::vault_over(&self.clock, &self.blobs, &self.ledger, &wallet)
    }

    fn vault_over(
        clock: &Arc<ManualClock>,
        blobs: &Arc<MemoryBlobStore>,
        ledger: &Arc<MemoryLedger>,
        wallet: &Arc<LocalWallet>,
    ) -> Vault {
        let config = VaultConfig {
            contract: contract(),
            ..VaultConfig::default()
        };
        let engine = Arc::new(LocalKeyEngine::with_iterations(
            wallet.address(),
            TEST_ITERATIONS,
        ));
        let services = VaultServices {
            blobs: blobs.clone(),
            ledger: ledger.clone(),
            signer: wallet.clone(),
            key_servers: Vec::new(),
            clock: clock.clone(),
        };
        Vault::with_engine(config, engine, services).unwrap()
    }

    pub fn engine(&self) -> LocalKeyEngine {
        LocalKeyEngine::with_iterations(self.wallet.address(), TEST_ITERATIONS)
    }

    pub async fn unlocked() -> Self {
        let harness = Self::new();
        harness
            .vault
            .unlock(UnlockProof::password(PASSWORD))
            .await
            .unwrap();
        harness
    }
}

pub fn note(title: &str, body: &str) -> EntryPayload {
    EntryPayload::Note {
        title: title.into(),
        body: body.into(),
        tags: vec!["test".into()],
        background_color: None,
        images: None,
    }
}

pub fn login(title: &str, secret: &str) -> EntryPayload {
    EntryPayload::Password {
        title: title.into(),
        username: "user@example.com".into(),
        secret: secret.into(),
        url: Some("https://example.com".into()),
        notes: None,
    }
}
