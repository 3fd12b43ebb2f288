//! Master password rotation.
//!
//! Re-encrypts every entry from the old password-derived key to a new one:
//! per entry, fetch → decrypt (old) → encrypt (new) → upload → delete old
//! record → create new record. The first failure aborts the run. Entries
//! already migrated stay migrated, the remainder stay under the old key, and
//! the session keeps the old capability; the caller learns exactly how far
//! the run got. The session switches to the new key only after every entry
//! has moved.
//!
//! An aborted run is resumed by running again with the same passwords from
//! a session opened with the old one. Entries that already open under the
//! new key are counted as migrated and left in place.

use tokio::sync::watch;

use crate::engine::{Capability, Strategy, UnlockProof};
use crate::error::VaultError;
use crate::orchestrator::VaultItemOrchestrator;
use crate::store::{LedgerRecord, RecordId};

/// Minimum length for a new master password, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Progress of a rotation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationState {
    Idle,
    VerifyingOldCapability,
    FetchingEntries,
    /// `current` is 1-based.
    ReencryptingEntries { current: usize, total: usize },
    Complete { migrated: usize },
    Aborted { reason: String },
}

/// One entry moved to the new key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedRecord {
    pub old: RecordId,
    pub new: RecordId,
}

/// Result of a completed rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub migrated: Vec<MigratedRecord>,
}

/// A single rotation run over one vault.
pub struct PasswordRotationWorkflow<'a> {
    orchestrator: &'a VaultItemOrchestrator,
    state: watch::Sender<RotationState>,
}

impl std::fmt::Debug for PasswordRotationWorkflow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordRotationWorkflow")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<'a> PasswordRotationWorkflow<'a> {
    #[must_use]
    pub fn new(orchestrator: &'a VaultItemOrchestrator) -> Self {
        let (state, _) = watch::channel(RotationState::Idle);
        Self {
            orchestrator,
            state,
        }
    }

    /// Follow progress.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RotationState> {
        self.state.subscribe()
    }

    /// Current progress.
    #[must_use]
    pub fn state(&self) -> RotationState {
        self.state.borrow().clone()
    }

    fn set(&self, state: RotationState) {
        tracing::debug!(?state, "rotation progress");
        self.state.send_replace(state);
    }

    fn fail(&self, err: VaultError) -> VaultError {
        self.set(RotationState::Aborted {
            reason: err.to_string(),
        });
        err
    }

    /// Rotate from `old` to `new`.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidRequest`] if the new password is too short or
    ///   equals the old one (checked before any store access)
    /// - [`VaultError::Unsupported`] for identity-bound vaults
    /// - [`VaultError::AuthFailure`] if `old` is not the current password
    /// - [`VaultError::AbortedRotation`] when an entry fails mid-run
    pub async fn run(&self, old: UnlockProof, new: UnlockProof) -> Result<RotationReport, VaultError> {
        validate_proofs(&old, &new)?;
        if self.orchestrator.engine().strategy() != Strategy::Local {
            return Err(VaultError::Unsupported(
                "identity-bound vaults have no password to rotate".into(),
            ));
        }
        let session = self.orchestrator.session();
        session.ensure_unlocked()?;

        self.set(RotationState::VerifyingOldCapability);
        let old_capability = self.verify_old(old).await.map_err(|e| self.fail(e))?;

        self.set(RotationState::FetchingEntries);
        let records = self
            .orchestrator
            .records()
            .await
            .map_err(|e| self.fail(e))?;

        let new_capability = self
            .orchestrator
            .engine()
            .establish(new)
            .await
            .map_err(|e| self.fail(e))?;

        let total = records.len();
        let mut report = RotationReport::default();
        for (index, record) in records.iter().enumerate() {
            self.set(RotationState::ReencryptingEntries {
                current: index.saturating_add(1),
                total,
            });
            match self.migrate(record, &old_capability, &new_capability).await {
                Ok(new_id) => report.migrated.push(MigratedRecord {
                    old: record.id.clone(),
                    new: new_id,
                }),
                Err(err) => {
                    let items_migrated = report.migrated.len();
                    tracing::warn!(
                        record = %record.id,
                        items_migrated,
                        total,
                        "password rotation aborted: {err}"
                    );
                    return Err(self.fail(VaultError::AbortedRotation {
                        reason: err.to_string(),
                        items_migrated,
                        total,
                    }));
                }
            }
        }

        session
            .replace_capability(new_capability)
            .map_err(|e| self.fail(e))?;
        self.set(RotationState::Complete { migrated: total });
        tracing::info!(migrated = total, "master password rotated");
        Ok(report)
    }

    async fn verify_old(&self, old: UnlockProof) -> Result<Capability, VaultError> {
        let current = self.orchestrator.session().capability()?;
        let candidate = self.orchestrator.engine().establish(old).await?;
        if candidate.matches(&current) {
            Ok(candidate)
        } else {
            Err(VaultError::AuthFailure)
        }
    }

    /// Move one record to the new key. A record already under the new key,
    /// left by an earlier aborted run, keeps its id.
    async fn migrate(
        &self,
        record: &LedgerRecord,
        old: &Capability,
        new: &Capability,
    ) -> Result<RecordId, VaultError> {
        self.orchestrator.session().ensure_unlocked()?;
        let entry = match self.orchestrator.decrypt_with(record, old).await {
            Ok(entry) => entry,
            Err(VaultError::Decrypt) => {
                self.orchestrator.decrypt_with(record, new).await?;
                tracing::debug!(record = %record.id, "already under the new key");
                return Ok(record.id.clone());
            }
            Err(err) => return Err(err),
        };
        let blob = self.orchestrator.engine().encrypt(&entry, new).await?;
        let blob_id = self.orchestrator.store_blob(blob).await?;
        self.orchestrator.submit_delete(&record.id).await?;
        self.orchestrator
            .submit_create(&blob_id, entry.category())
            .await
            .map_err(|e| {
                VaultError::Store(format!(
                    "record {} was removed but its re-encrypted copy (blob {blob_id}) could not be indexed: {e}",
                    record.id
                ))
            })
    }
}

fn validate_proofs(old: &UnlockProof, new: &UnlockProof) -> Result<(), VaultError> {
    let (UnlockProof::Password(old), UnlockProof::Password(new)) = (old, new) else {
        return Err(VaultError::Unsupported(
            "password rotation takes two passwords".into(),
        ));
    };
    if new.chars().count() < MIN_PASSWORD_LEN {
        return Err(VaultError::InvalidRequest(format!(
            "New password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    if old.as_str() == new.as_str() {
        return Err(VaultError::InvalidRequest(
            "New password must be different from the current one.".into(),
        ));
    }
    Ok(())
}
