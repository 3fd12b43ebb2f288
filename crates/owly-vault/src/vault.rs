//! Caller-facing vault handle.
//!
//! Wires a [`CryptoEngine`], a [`SessionManager`] and a
//! [`VaultItemOrchestrator`] over the configured collaborators. Every entry
//! operation requires a live session and counts as user activity.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::clock::Clock;
use crate::config::{validate_auto_lock_minutes, VaultConfig};
use crate::engine::{build_engine, Challenge, CryptoEngine, KeyReleaseService, Strategy, UnlockProof};
use crate::entries::{EntryPayload, VaultEntry};
use crate::error::VaultError;
use crate::identity::OwnerAddress;
use crate::orchestrator::{ListedEntry, OrphanCleanupReport, UpdateOutcome, VaultItemOrchestrator};
use crate::rotation::{PasswordRotationWorkflow, RotationReport};
use crate::session::{LockStatus, SessionInfo, SessionManager, SessionPhase};
use crate::store::{BlobStore, Ledger, RecordId, TransactionSigner};

/// External collaborators a vault runs against.
#[derive(Clone)]
pub struct VaultServices {
    pub blobs: Arc<dyn BlobStore>,
    pub ledger: Arc<dyn Ledger>,
    pub signer: Arc<dyn TransactionSigner>,
    /// Only used by identity-bound vaults.
    pub key_servers: Vec<Arc<dyn KeyReleaseService>>,
    pub clock: Arc<dyn Clock>,
}

/// An owner's vault.
pub struct Vault {
    config: VaultConfig,
    auto_lock_minutes: AtomicU32,
    clock: Arc<dyn Clock>,
    engine: Arc<dyn CryptoEngine>,
    session: Arc<SessionManager>,
    orchestrator: VaultItemOrchestrator,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("owner", self.owner())
            .field("strategy", &self.engine.strategy())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Build a vault for the signer's address using the configured strategy.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidRequest`] for an invalid config or an
    /// unreachable key-server threshold.
    pub fn open(config: VaultConfig, services: VaultServices) -> Result<Self, VaultError> {
        let owner = services.signer.address();
        let engine = build_engine(
            &config,
            owner,
            services.key_servers.clone(),
            Arc::clone(&services.clock),
        )?;
        Self::with_engine(config, engine, services)
    }

    /// Build a vault around an existing engine.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidRequest`] for an invalid config, or when the
    /// engine and the signer belong to different owners.
    pub fn with_engine(
        config: VaultConfig,
        engine: Arc<dyn CryptoEngine>,
        services: VaultServices,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        let owner = *engine.owner();
        if services.signer.address() != owner {
            return Err(VaultError::InvalidRequest(format!(
                "signer {} cannot act for vault owner {owner}",
                services.signer.address()
            )));
        }

        let session = Arc::new(SessionManager::new(
            Arc::clone(&services.clock),
            config.auto_lock_minutes,
            config.warning_threshold_secs,
        ));
        let orchestrator = VaultItemOrchestrator::new(
            owner,
            config.contract.clone(),
            config.storage_epochs,
            Arc::clone(&engine),
            services.blobs,
            services.ledger,
            services.signer,
            Arc::clone(&session),
        );
        tracing::debug!(owner = %owner, strategy = ?engine.strategy(), "vault opened");

        Ok(Self {
            auto_lock_minutes: AtomicU32::new(config.auto_lock_minutes),
            config,
            clock: services.clock,
            engine,
            session,
            orchestrator,
        })
    }

    #[must_use]
    pub const fn owner(&self) -> &OwnerAddress {
        self.orchestrator.owner()
    }

    /// Current settings, including any timeout change made at runtime.
    #[must_use]
    pub fn config(&self) -> VaultConfig {
        VaultConfig {
            auto_lock_minutes: self.auto_lock_minutes.load(Ordering::SeqCst),
            ..self.config.clone()
        }
    }

    fn begin_operation(&self) -> Result<(), VaultError> {
        self.session.ensure_unlocked()?;
        self.session.touch();
        Ok(())
    }

    // ── Session ────────────────────────────────────────────────────

    /// Challenge to sign before unlocking an identity-bound vault.
    ///
    /// # Errors
    ///
    /// [`VaultError::Unsupported`] for password vaults; key server errors.
    pub async fn request_challenge(&self) -> Result<Challenge, VaultError> {
        self.engine.request_challenge().await
    }

    /// Exchange a proof for a session and start the auto-lock ticker.
    ///
    /// Password vaults check the derived key against the stored entries
    /// and accept it once any of them opens, so a wrong password fails here
    /// rather than on first read.
    ///
    /// # Errors
    ///
    /// [`VaultError::AuthFailure`] for a rejected proof; nothing changes.
    pub async fn unlock(&self, proof: UnlockProof) -> Result<SessionInfo, VaultError> {
        let info = self
            .session
            .create(async {
                let capability = self.engine.establish(proof).await?;
                if self.engine.strategy() == Strategy::Local {
                    self.orchestrator.probe_capability(&capability).await?;
                }
                Ok(capability)
            })
            .await?;
        self.session.start_auto_lock();
        Ok(info)
    }

    /// Lock immediately. Idempotent.
    pub fn lock(&self) {
        self.session.lock();
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    /// Seconds until auto-lock; zero when locked.
    #[must_use]
    pub fn time_remaining(&self) -> u64 {
        self.session.time_remaining()
    }

    #[must_use]
    pub fn lock_status(&self) -> LockStatus {
        self.session.lock_status()
    }

    /// Record a user interaction outside of entry operations.
    pub fn touch(&self) {
        self.session.touch();
    }

    /// Watch lock and unlock events.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.session.subscribe()
    }

    /// Change the inactivity timeout (1–60 minutes) and return the
    /// recomputed remaining seconds.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidRequest`] when out of range.
    pub fn set_inactivity_timeout(&self, minutes: u32) -> Result<u64, VaultError> {
        validate_auto_lock_minutes(minutes)?;
        self.auto_lock_minutes.store(minutes, Ordering::SeqCst);
        Ok(self.session.set_timeout(minutes))
    }

    // ── Entries ────────────────────────────────────────────────────

    /// Store a new entry stamped with the current time.
    ///
    /// # Errors
    ///
    /// See [`VaultItemOrchestrator::create`].
    pub async fn create_entry(&self, payload: EntryPayload) -> Result<RecordId, VaultError> {
        self.begin_operation()?;
        let now = self.clock.now_secs();
        let entry = VaultEntry {
            payload,
            created_at: now,
            updated_at: now,
        };
        self.orchestrator.create(&entry).await
    }

    /// # Errors
    ///
    /// See [`VaultItemOrchestrator::read`].
    pub async fn read_entry(&self, id: &RecordId) -> Result<VaultEntry, VaultError> {
        self.begin_operation()?;
        self.orchestrator.read(id).await
    }

    /// Replace an entry with an edited version; `updated_at` is set to now.
    ///
    /// # Errors
    ///
    /// See [`VaultItemOrchestrator::update`].
    pub async fn update_entry(
        &self,
        id: &RecordId,
        mut entry: VaultEntry,
    ) -> Result<UpdateOutcome, VaultError> {
        self.begin_operation()?;
        entry.updated_at = self.clock.now_secs();
        self.orchestrator.update(id, &entry).await
    }

    /// # Errors
    ///
    /// See [`VaultItemOrchestrator::delete`].
    pub async fn delete_entry(&self, id: &RecordId) -> Result<(), VaultError> {
        self.begin_operation()?;
        self.orchestrator.delete(id).await
    }

    /// # Errors
    ///
    /// See [`VaultItemOrchestrator::list_entries`].
    pub async fn list_entries(&self) -> Result<Vec<ListedEntry>, VaultError> {
        self.begin_operation()?;
        self.orchestrator.list_entries().await
    }

    /// # Errors
    ///
    /// See [`VaultItemOrchestrator::list_orphans`].
    pub async fn list_orphans(&self, owner: &OwnerAddress) -> Result<Vec<RecordId>, VaultError> {
        self.begin_operation()?;
        self.orchestrator.list_orphans(owner).await
    }

    /// # Errors
    ///
    /// See [`VaultItemOrchestrator::delete_orphans`].
    pub async fn delete_orphans(&self, ids: &[RecordId]) -> Result<OrphanCleanupReport, VaultError> {
        self.begin_operation()?;
        self.orchestrator.delete_orphans(ids).await
    }

    // ── Password rotation ──────────────────────────────────────────

    /// A rotation run whose progress can be watched before calling
    /// [`PasswordRotationWorkflow::run`].
    #[must_use]
    pub fn rotation(&self) -> PasswordRotationWorkflow<'_> {
        PasswordRotationWorkflow::new(&self.orchestrator)
    }

    /// Re-encrypt every entry under a new master password.
    ///
    /// # Errors
    ///
    /// See [`PasswordRotationWorkflow::run`].
    pub async fn rotate_password(
        &self,
        old: UnlockProof,
        new: UnlockProof,
    ) -> Result<RotationReport, VaultError> {
        self.session.touch();
        self.rotation().run(old, new).await
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        self.session.lock();
    }
}
