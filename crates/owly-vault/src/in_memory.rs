//! In-process collaborators: blob store, ledger and key-release server.
//!
//! They enforce the same rules as the remote services (content addressing,
//! epoch retention, signed transactions, on-ledger ownership policy) and
//! expose fault injection so partial-failure paths can be exercised.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use owly_crypto_core::kem::{self, X25519_PUBLIC_KEY_LEN};
use owly_crypto_core::{SecretBuffer, SecretBytes};
use rand::RngCore;

use crate::clock::Clock;
use crate::config::ContractConfig;
use crate::engine::{AccessProof, Challenge, IdentityToken, KeyReleaseService, SignedChallenge};
use crate::entries::Category;
use crate::error::StoreError;
use crate::identity::OwnerAddress;
use crate::store::{
    BlobId, BlobStore, Ledger, LedgerRecord, RecordId, SignedTransaction, TransactionKind,
};

fn guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("internal lock poisoned".into()))
}

/// Consume one permit from an optional countdown. `None` means unlimited.
fn take_permit(remaining: &mut Option<usize>) -> bool {
    match remaining {
        None => true,
        Some(0) => false,
        Some(n) => {
            *n = n.saturating_sub(1);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

struct StoredBlob {
    bytes: Vec<u8>,
    end_epoch: u64,
}

#[derive(Default)]
struct BlobFaults {
    puts_before_failure: Option<usize>,
    unavailable: bool,
}

/// Content-addressed blob store with epoch-based retention.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<BlobId, StoredBlob>>,
    epoch: AtomicU64,
    faults: Mutex<BlobFaults>,
}

impl fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance retention time; blobs past their end epoch disappear.
    pub fn advance_epochs(&self, epochs: u64) {
        let _ = self
            .epoch
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |e| {
                Some(e.saturating_add(epochs))
            });
    }

    /// Drop a blob immediately, as if it had expired.
    pub fn evict(&self, id: &BlobId) -> bool {
        guard(&self.blobs).is_ok_and(|mut blobs| blobs.remove(id).is_some())
    }

    /// Let `n` more uploads succeed, then fail every upload.
    /// `None` removes the limit.
    pub fn fail_puts_after(&self, n: Option<usize>) {
        if let Ok(mut faults) = guard(&self.faults) {
            faults.puts_before_failure = n;
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut faults) = guard(&self.faults) {
            faults.unavailable = unavailable;
        }
    }

    /// Number of live blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        let epoch = self.epoch.load(Ordering::SeqCst);
        guard(&self.blobs).map_or(0, |blobs| {
            blobs.values().filter(|b| b.end_epoch > epoch).count()
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>, epochs: u32) -> Result<BlobId, StoreError> {
        {
            let mut faults = guard(&self.faults)?;
            if faults.unavailable {
                return Err(StoreError::Unavailable("blob store offline".into()));
            }
            if !take_permit(&mut faults.puts_before_failure) {
                return Err(StoreError::Unavailable("injected upload failure".into()));
            }
        }
        if epochs == 0 {
            return Err(StoreError::Rejected("retention must be at least one epoch".into()));
        }

        let id = BlobId(blake3::hash(&bytes).to_hex().to_string());
        let end_epoch = self
            .epoch
            .load(Ordering::SeqCst)
            .saturating_add(u64::from(epochs));

        let mut blobs = guard(&self.blobs)?;
        blobs
            .entry(id.clone())
            .and_modify(|b| b.end_epoch = b.end_epoch.max(end_epoch))
            .or_insert(StoredBlob { bytes, end_epoch });
        tracing::debug!(blob = %id, end_epoch, "blob stored");
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StoreError> {
        if guard(&self.faults)?.unavailable {
            return Err(StoreError::Unavailable("blob store offline".into()));
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut blobs = guard(&self.blobs)?;
        match blobs.get(id) {
            Some(blob) if blob.end_epoch > epoch => Ok(blob.bytes.clone()),
            Some(_) => {
                blobs.remove(id);
                Err(StoreError::NotFound(format!("blob {id} expired")))
            }
            None => Err(StoreError::NotFound(format!("blob {id}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerFaults {
    creates_before_failure: Option<usize>,
    failing_deletes: HashSet<RecordId>,
    unavailable: bool,
}

/// Ledger that verifies signed transactions against one contract.
pub struct MemoryLedger {
    contract: ContractConfig,
    clock: Arc<dyn Clock>,
    records: Mutex<Vec<LedgerRecord>>,
    next_id: AtomicU64,
    faults: Mutex<LedgerFaults>,
}

impl fmt::Debug for MemoryLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLedger")
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

impl MemoryLedger {
    #[must_use]
    pub fn new(contract: ContractConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            contract,
            clock,
            records: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            faults: Mutex::new(LedgerFaults::default()),
        }
    }

    /// Let `n` more record creations succeed, then fail every creation.
    pub fn fail_creates_after(&self, n: Option<usize>) {
        if let Ok(mut faults) = guard(&self.faults) {
            faults.creates_before_failure = n;
        }
    }

    /// Make deletion of `id` fail with [`StoreError::Unavailable`].
    pub fn fail_delete_of(&self, id: RecordId) {
        if let Ok(mut faults) = guard(&self.faults) {
            faults.failing_deletes.insert(id);
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut faults) = guard(&self.faults) {
            faults.unavailable = unavailable;
        }
    }

    /// Total records across all owners.
    #[must_use]
    pub fn len(&self) -> usize {
        guard(&self.records).map_or(0, |records| records.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_target(&self, transaction: &SignedTransaction, function: &str) -> Result<(), StoreError> {
        let expected = format!(
            "{}::{}::{function}",
            self.contract.package_id, self.contract.module_name
        );
        if transaction.transaction.target == expected {
            Ok(())
        } else {
            Err(StoreError::Rejected(format!(
                "unknown entry point {}",
                transaction.transaction.target
            )))
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if guard(&self.faults)?.unavailable {
            Err(StoreError::Unavailable("ledger offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_record(&self, transaction: &SignedTransaction) -> Result<RecordId, StoreError> {
        self.check_available()?;
        transaction.verify()?;
        self.check_target(transaction, "create_vault_item")?;

        let TransactionKind::CreateVaultItem { blob_id, category } = &transaction.transaction.kind
        else {
            return Err(StoreError::Rejected("expected create_vault_item".into()));
        };
        let blob_id = String::from_utf8(blob_id.clone())
            .map_err(|_| StoreError::Rejected("blob id is not UTF-8".into()))?;

        if !take_permit(&mut guard(&self.faults)?.creates_before_failure) {
            return Err(StoreError::Unavailable("injected ledger failure".into()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = LedgerRecord {
            id: RecordId(format!("0x{n:064x}")),
            owner: transaction.transaction.sender,
            blob_id: BlobId(blob_id),
            category: Category::from_ledger_code(*category),
            created_at: self.clock.now_secs(),
        };
        let id = record.id.clone();
        guard(&self.records)?.push(record);
        tracing::debug!(record = %id, "ledger record created");
        Ok(id)
    }

    async fn delete_record(&self, transaction: &SignedTransaction) -> Result<(), StoreError> {
        self.check_available()?;
        transaction.verify()?;
        self.check_target(transaction, "delete_vault_item")?;

        let TransactionKind::DeleteVaultItem { record_id } = &transaction.transaction.kind else {
            return Err(StoreError::Rejected("expected delete_vault_item".into()));
        };
        if guard(&self.faults)?.failing_deletes.contains(record_id) {
            return Err(StoreError::Unavailable("injected delete failure".into()));
        }

        let mut records = guard(&self.records)?;
        let index = records
            .iter()
            .position(|r| &r.id == record_id)
            .ok_or_else(|| StoreError::NotFound(format!("record {record_id}")))?;
        if records[index].owner != transaction.transaction.sender {
            return Err(StoreError::Rejected("only the owner can delete a record".into()));
        }
        records.remove(index);
        tracing::debug!(record = %record_id, "ledger record deleted");
        Ok(())
    }

    async fn list_records(&self, owner: &OwnerAddress) -> Result<Vec<LedgerRecord>, StoreError> {
        self.check_available()?;
        Ok(guard(&self.records)?
            .iter()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect())
    }

    async fn get_record(&self, id: &RecordId) -> Result<LedgerRecord, StoreError> {
        self.check_available()?;
        guard(&self.records)?
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("record {id}")))
    }
}

// ---------------------------------------------------------------------------
// Key-release server
// ---------------------------------------------------------------------------

/// Key server deriving per-identity keys from a master secret.
///
/// Exchanges a signed challenge for an opaque token and forgets the
/// challenge. Releases an identity secret only for a live token carrying
/// this committee's tag, and only when the access proof names a ledger
/// record owned by that identity.
pub struct MemoryKeyServer {
    id: String,
    master: SecretBuffer,
    contract: ContractConfig,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl fmt::Debug for MemoryKeyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKeyServer")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl MemoryKeyServer {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        master: &[u8],
        contract: ContractConfig,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: id.into(),
            master: SecretBuffer::new(master),
            contract,
            ledger,
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("key server {} offline", self.id)))
        } else {
            Ok(())
        }
    }

    fn check_signed(&self, signed: &SignedChallenge) -> Result<(), StoreError> {
        signed.verify()?;
        if signed.challenge.package_id != self.contract.package_id {
            return Err(StoreError::Rejected("challenge is for another package".into()));
        }
        let now = self.clock.now_secs();
        if signed.challenge.issued_at > now {
            return Err(StoreError::Rejected("challenge issued in the future".into()));
        }
        if now >= signed.challenge.expires_at() {
            return Err(StoreError::Expired);
        }
        Ok(())
    }

    /// Keyed BLAKE3 over the token fields, under a key derived from the
    /// master secret.
    fn token_tag(&self, identity: &OwnerAddress, issued_at: u64, expires_at: u64) -> blake3::Hash {
        let key = blake3::derive_key("owly key server session token v1", self.master.expose());
        let mut hasher = blake3::Hasher::new_keyed(&key);
        hasher.update(identity.as_bytes());
        hasher.update(&issued_at.to_le_bytes());
        hasher.update(&expires_at.to_le_bytes());
        hasher.finalize()
    }

    fn check_token(&self, token: &IdentityToken) -> Result<(), StoreError> {
        let tag: [u8; blake3::OUT_LEN] = token
            .tag
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Rejected("malformed session token".into()))?;
        // blake3::Hash compares in constant time.
        if self.token_tag(&token.identity, token.issued_at, token.expires_at) != tag {
            return Err(StoreError::Rejected("session token not issued by this committee".into()));
        }
        if self.clock.now_secs() >= token.expires_at {
            return Err(StoreError::Expired);
        }
        Ok(())
    }

    async fn check_policy(&self, token: &IdentityToken, proof: &AccessProof) -> Result<(), StoreError> {
        let expected = format!(
            "{}::{}::seal_approve",
            self.contract.package_id, self.contract.module_name
        );
        if proof.target != expected
            || proof.sender != token.identity
            || proof.key_id.as_slice() != token.identity.as_bytes()
        {
            return Err(StoreError::Rejected("access denied".into()));
        }
        match self.ledger.get_record(&proof.record_id).await {
            Ok(record) if record.owner == token.identity => Ok(()),
            Ok(_) | Err(StoreError::NotFound(_)) => Err(StoreError::Rejected("access denied".into())),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl KeyReleaseService for MemoryKeyServer {
    fn server_id(&self) -> &str {
        &self.id
    }

    async fn request_challenge(
        &self,
        identity: &OwnerAddress,
        ttl_minutes: u32,
    ) -> Result<Challenge, StoreError> {
        self.check_available()?;
        if ttl_minutes == 0 {
            return Err(StoreError::Rejected("TTL must be at least one minute".into()));
        }
        let mut nonce = [0u8; 16];
        rand::rngs::OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| StoreError::Unavailable(format!("CSPRNG failure: {e}")))?;
        Ok(Challenge {
            identity: *identity,
            package_id: self.contract.package_id.clone(),
            issued_at: self.clock.now_secs(),
            ttl_minutes,
            nonce: HEXLOWER.encode(&nonce),
        })
    }

    async fn release_capability(&self, signed: &SignedChallenge) -> Result<IdentityToken, StoreError> {
        self.check_available()?;
        self.check_signed(signed)?;
        let identity = signed.challenge.identity;
        let issued_at = signed.challenge.issued_at;
        let expires_at = signed.challenge.expires_at();
        Ok(IdentityToken {
            server_id: self.id.clone(),
            identity,
            issued_at,
            expires_at,
            tag: self.token_tag(&identity, issued_at, expires_at).as_bytes().to_vec(),
        })
    }

    async fn identity_public_key(
        &self,
        identity: &OwnerAddress,
    ) -> Result<[u8; X25519_PUBLIC_KEY_LEN], StoreError> {
        self.check_available()?;
        let pair = kem::derive_identity_keypair(self.master.expose(), identity.as_bytes())
            .map_err(|e| StoreError::Unavailable(format!("key derivation: {e}")))?;
        Ok(pair.public)
    }

    async fn release_identity_key(
        &self,
        token: &IdentityToken,
        proof: &AccessProof,
    ) -> Result<SecretBytes<32>, StoreError> {
        self.check_available()?;
        self.check_token(token)?;
        self.check_policy(token, proof).await?;

        let pair = kem::derive_identity_keypair(self.master.expose(), token.identity.as_bytes())
            .map_err(|e| StoreError::Unavailable(format!("key derivation: {e}")))?;
        tracing::debug!(server = %self.id, record = %proof.record_id, "identity key released");
        Ok(pair.secret)
    }
}
