//! Entry operations across the blob store and the ledger.
//!
//! Every mutation crosses two independent stores with no shared
//! transaction, so ordering decides what a partial failure leaves behind:
//!
//! - create: blob first, then record. A failed record write leaves an
//!   unreferenced blob, which expires on its own.
//! - update: new blob and record first, then delete the old record. A
//!   failed delete leaves a duplicate that is reported, never silently lost.
//! - a record whose blob has expired is an orphan: reported distinctly and
//!   removable through [`delete_orphans`](VaultItemOrchestrator::delete_orphans).

use std::sync::Arc;

use futures::future::join_all;

use crate::config::ContractConfig;
use crate::engine::{Capability, CryptoEngine, EncryptedBlob};
use crate::entries::{Category, VaultEntry};
use crate::error::{StoreError, VaultError};
use crate::identity::OwnerAddress;
use crate::session::{SessionManager, EXPIRY_GRACE_SECS};
use crate::store::{
    BlobId, BlobStore, Ledger, LedgerRecord, RecordId, TransactionSigner, UnsignedTransaction,
};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Fate of the record an update replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupersededRecord {
    Deleted(RecordId),
    /// Still on the ledger; the entry now appears twice until removed.
    Retained { id: RecordId, reason: String },
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub id: RecordId,
    pub superseded: SupersededRecord,
}

/// One row of an entry listing.
#[derive(Debug)]
pub enum ListedEntry {
    Live {
        record: LedgerRecord,
        entry: VaultEntry,
    },
    Orphaned {
        record: LedgerRecord,
    },
    /// The blob is present but does not open under the session key, as
    /// after an interrupted password rotation.
    Undecryptable {
        record: LedgerRecord,
    },
}

impl ListedEntry {
    #[must_use]
    pub const fn record(&self) -> &LedgerRecord {
        match self {
            Self::Live { record, .. } | Self::Orphaned { record } | Self::Undecryptable { record } => {
                record
            }
        }
    }
}

/// Per-id result of an orphan cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanCleanupReport {
    pub deleted: Vec<RecordId>,
    pub failed: Vec<(RecordId, String)>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Coordinates entry CRUD for one owner.
pub struct VaultItemOrchestrator {
    owner: OwnerAddress,
    contract: ContractConfig,
    storage_epochs: u32,
    engine: Arc<dyn CryptoEngine>,
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn Ledger>,
    signer: Arc<dyn TransactionSigner>,
    session: Arc<SessionManager>,
}

impl std::fmt::Debug for VaultItemOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultItemOrchestrator")
            .field("owner", &self.owner)
            .field("storage_epochs", &self.storage_epochs)
            .finish_non_exhaustive()
    }
}

impl VaultItemOrchestrator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        owner: OwnerAddress,
        contract: ContractConfig,
        storage_epochs: u32,
        engine: Arc<dyn CryptoEngine>,
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<dyn Ledger>,
        signer: Arc<dyn TransactionSigner>,
        session: Arc<SessionManager>,
    ) -> Self {
        Self {
            owner,
            contract,
            storage_epochs,
            engine,
            blobs,
            ledger,
            signer,
            session,
        }
    }

    #[must_use]
    pub const fn owner(&self) -> &OwnerAddress {
        &self.owner
    }

    pub(crate) fn engine(&self) -> &dyn CryptoEngine {
        self.engine.as_ref()
    }

    pub(crate) fn session(&self) -> &SessionManager {
        &self.session
    }

    // ── Building blocks ────────────────────────────────────────────

    /// Owner's records, newest first.
    pub(crate) async fn records(&self) -> Result<Vec<LedgerRecord>, VaultError> {
        let mut records = self.ledger.list_records(&self.owner).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// A record owned by this vault's owner. Other owners' records are
    /// reported as missing.
    pub(crate) async fn owned_record(&self, id: &RecordId) -> Result<LedgerRecord, VaultError> {
        let record = self.ledger.get_record(id).await?;
        if record.owner == self.owner {
            Ok(record)
        } else {
            Err(VaultError::NotFound(format!("record {id}")))
        }
    }

    pub(crate) async fn fetch_blob(&self, record: &LedgerRecord) -> Result<EncryptedBlob, VaultError> {
        match self.blobs.get(&record.blob_id).await {
            Ok(bytes) => Ok(EncryptedBlob::from_bytes(bytes)),
            Err(StoreError::NotFound(_)) => Err(VaultError::Orphaned {
                record_id: record.id.to_string(),
                blob_id: record.blob_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn store_blob(&self, blob: EncryptedBlob) -> Result<BlobId, VaultError> {
        Ok(self.blobs.put(blob.into_bytes(), self.storage_epochs).await?)
    }

    pub(crate) async fn submit_create(
        &self,
        blob_id: &BlobId,
        category: Category,
    ) -> Result<RecordId, VaultError> {
        let tx = UnsignedTransaction::create_vault_item(
            self.owner,
            &self.contract.package_id,
            &self.contract.module_name,
            blob_id,
            category,
        );
        let signed = self.signer.sign_transaction(tx).await?;
        Ok(self.ledger.create_record(&signed).await?)
    }

    pub(crate) async fn submit_delete(&self, id: &RecordId) -> Result<(), VaultError> {
        let tx = UnsignedTransaction::delete_vault_item(
            self.owner,
            &self.contract.package_id,
            &self.contract.module_name,
            id,
        );
        let signed = self.signer.sign_transaction(tx).await?;
        Ok(self.ledger.delete_record(&signed).await?)
    }

    /// Open a blob with an explicit capability.
    pub(crate) async fn decrypt_with(
        &self,
        record: &LedgerRecord,
        capability: &Capability,
    ) -> Result<VaultEntry, VaultError> {
        let blob = self.fetch_blob(record).await?;
        self.engine.decrypt(&blob, capability, record).await
    }

    /// Seal, upload and index an entry with an explicit capability.
    pub(crate) async fn persist_with(
        &self,
        entry: &VaultEntry,
        capability: &Capability,
    ) -> Result<RecordId, VaultError> {
        let blob = self.engine.encrypt(entry, capability).await?;
        let blob_id = self.store_blob(blob).await?;
        self.submit_create(&blob_id, entry.category())
            .await
            .inspect_err(|e| {
                tracing::warn!(blob = %blob_id, "blob uploaded but ledger write failed: {e}");
            })
    }

    /// Check a freshly derived capability against existing entries.
    ///
    /// Walks entries newest first and accepts as soon as one opens. An
    /// interrupted rotation leaves entries under two keys, so one that does
    /// not open is not yet a verdict. Orphans are skipped; a vault with no
    /// readable entry accepts any capability.
    ///
    /// # Errors
    ///
    /// [`VaultError::AuthFailure`] if no readable entry opens.
    pub async fn probe_capability(&self, capability: &Capability) -> Result<(), VaultError> {
        let mut refused = 0usize;
        for record in self.records().await? {
            match self.decrypt_with(&record, capability).await {
                Ok(_) => return Ok(()),
                Err(VaultError::Orphaned { .. }) => {}
                Err(VaultError::Decrypt) => refused = refused.saturating_add(1),
                Err(err) => return Err(err),
            }
        }
        if refused == 0 {
            Ok(())
        } else {
            tracing::debug!(refused, "no entry opens under the candidate key");
            Err(VaultError::AuthFailure)
        }
    }

    /// Open a record with the session capability. Liveness is checked
    /// right before decryption.
    async fn open(&self, record: &LedgerRecord) -> Result<VaultEntry, VaultError> {
        let blob = self.fetch_blob(record).await?;
        let capability = self.session.capability()?;
        self.engine
            .decrypt(&blob, &capability, record)
            .await
            .map_err(|err| match err {
                VaultError::Decrypt if self.session.near_expiry(EXPIRY_GRACE_SECS) => {
                    VaultError::SessionExpired
                }
                other => other,
            })
    }

    // ── Entry operations ───────────────────────────────────────────

    /// Encrypt, upload and index a new entry.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotUnlocked`] without a live session; store errors from
    /// either write. A failed ledger write leaves only an unreferenced blob.
    pub async fn create(&self, entry: &VaultEntry) -> Result<RecordId, VaultError> {
        let capability = self.session.capability()?;
        let id = self.persist_with(entry, &capability).await?;
        tracing::info!(record = %id, category = %entry.category(), "entry created");
        Ok(id)
    }

    /// Fetch and decrypt one entry.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for unknown records,
    /// [`VaultError::Orphaned`] when the blob is gone,
    /// [`VaultError::Decrypt`] when it does not authenticate.
    pub async fn read(&self, id: &RecordId) -> Result<VaultEntry, VaultError> {
        self.session.ensure_unlocked()?;
        let record = self.owned_record(id).await?;
        self.open(&record).await
    }

    /// Replace an entry: write the new version, then delete the old record.
    ///
    /// # Errors
    ///
    /// Fails without touching the old record if the new version cannot be
    /// written. A failed delete is reported in the outcome, not as an error.
    pub async fn update(&self, id: &RecordId, entry: &VaultEntry) -> Result<UpdateOutcome, VaultError> {
        self.session.ensure_unlocked()?;
        let old = self.owned_record(id).await?;
        let new_id = self.create(entry).await?;

        let superseded = match self.submit_delete(&old.id).await {
            Ok(()) => SupersededRecord::Deleted(old.id),
            Err(err) => {
                tracing::warn!(old = %old.id, new = %new_id, "superseded record not deleted: {err}");
                SupersededRecord::Retained {
                    id: old.id,
                    reason: err.to_string(),
                }
            }
        };
        Ok(UpdateOutcome {
            id: new_id,
            superseded,
        })
    }

    /// Remove a record. Its blob is left to expire.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for unknown records; ledger errors.
    pub async fn delete(&self, id: &RecordId) -> Result<(), VaultError> {
        self.session.ensure_unlocked()?;
        let record = self.owned_record(id).await?;
        self.submit_delete(&record.id).await?;
        tracing::info!(record = %id, "entry deleted");
        Ok(())
    }

    /// Every record of the owner, newest first, decrypted where possible.
    ///
    /// A record that is orphaned or does not open under the session key
    /// gets its own row and never hides the others.
    ///
    /// # Errors
    ///
    /// Store errors, a lost session, or [`VaultError::SessionExpired`].
    pub async fn list_entries(&self) -> Result<Vec<ListedEntry>, VaultError> {
        self.session.ensure_unlocked()?;
        let records = self.records().await?;
        let opened = join_all(records.iter().map(|record| self.open(record))).await;

        let mut listed = Vec::with_capacity(records.len());
        for (record, result) in records.into_iter().zip(opened) {
            match result {
                Ok(entry) => listed.push(ListedEntry::Live { record, entry }),
                Err(VaultError::Orphaned { .. }) => listed.push(ListedEntry::Orphaned { record }),
                Err(VaultError::Decrypt) => {
                    tracing::warn!(record = %record.id, "entry does not open under the session key");
                    listed.push(ListedEntry::Undecryptable { record });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(listed)
    }

    /// Records of `owner` whose blob is no longer retrievable.
    ///
    /// # Errors
    ///
    /// Ledger errors, or blob store errors other than "not found" (a blob
    /// that cannot be checked is never classified as orphaned).
    pub async fn list_orphans(&self, owner: &OwnerAddress) -> Result<Vec<RecordId>, VaultError> {
        self.session.ensure_unlocked()?;
        let records = self.ledger.list_records(owner).await?;
        let probes = join_all(records.iter().map(|r| self.blobs.get(&r.blob_id))).await;

        let mut orphans = Vec::new();
        for (record, probe) in records.into_iter().zip(probes) {
            match probe {
                Ok(_) => {}
                Err(StoreError::NotFound(_)) => orphans.push(record.id),
                Err(err) => return Err(err.into()),
            }
        }
        tracing::debug!(owner = %owner, count = orphans.len(), "orphan scan complete");
        Ok(orphans)
    }

    /// Delete the given records concurrently.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotUnlocked`] without a live session. Per-record
    /// failures are reported in the returned report.
    pub async fn delete_orphans(&self, ids: &[RecordId]) -> Result<OrphanCleanupReport, VaultError> {
        self.session.ensure_unlocked()?;
        let results = join_all(ids.iter().map(|id| self.submit_delete(id))).await;

        let mut report = OrphanCleanupReport::default();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => report.deleted.push(id.clone()),
                Err(err) => {
                    tracing::warn!(record = %id, "orphan cleanup failed: {err}");
                    report.failed.push((id.clone(), err.to_string()));
                }
            }
        }
        tracing::info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "orphan cleanup finished"
        );
        Ok(report)
    }
}
