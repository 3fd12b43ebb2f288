//! Single-file demo backend.
//!
//! Implements both [`BlobStore`] and [`Ledger`] on top of one JSON file
//! (`{data_dir}/owly-demo.json`) so the full vault flow runs without any
//! network. Blobs are stored base64-encoded; retention epochs are accepted
//! but never expire.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::ContractConfig;
use crate::entries::Category;
use crate::error::StoreError;
use crate::identity::OwnerAddress;
use crate::store::{
    BlobId, BlobStore, Ledger, LedgerRecord, RecordId, SignedTransaction, TransactionKind,
};

const DEMO_FILE: &str = "owly-demo.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct DemoState {
    #[serde(default)]
    blobs: BTreeMap<BlobId, String>,
    #[serde(default)]
    records: Vec<LedgerRecord>,
    #[serde(default)]
    next_record: u64,
}

/// JSON-file blob store and ledger.
pub struct DemoStore {
    dir: PathBuf,
    contract: ContractConfig,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for DemoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl DemoStore {
    /// Open (or lazily create) the demo file in `data_dir`.
    #[must_use]
    pub fn open(data_dir: &Path, contract: ContractConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: data_dir.to_path_buf(),
            contract,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<DemoState, StoreError> {
        let path = self.dir.join(DEMO_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::Unavailable(format!("{DEMO_FILE} is corrupt: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DemoState::default()),
            Err(e) => Err(StoreError::Unavailable(format!("read {DEMO_FILE}: {e}"))),
        }
    }

    fn save(&self, state: &DemoState) -> Result<(), StoreError> {
        let path = self.dir.join(DEMO_FILE);
        let tmp = self.dir.join(".owly-demo.json.tmp");
        let io_err = |e: std::io::Error| StoreError::Unavailable(format!("write {DEMO_FILE}: {e}"));

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Unavailable(format!("encode {DEMO_FILE}: {e}")))?;
        fs::write(&tmp, json).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }
        fs::rename(&tmp, &path).map_err(io_err)
    }

    /// Load, mutate, and persist under the write lock.
    fn update<R>(
        &self,
        mutate: impl FnOnce(&mut DemoState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("demo store lock poisoned".into()))?;
        let mut state = self.load()?;
        let result = mutate(&mut state)?;
        self.save(&state)?;
        Ok(result)
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
}

#[async_trait]
impl BlobStore for DemoStore {
    async fn put(&self, bytes: Vec<u8>, epochs: u32) -> Result<BlobId, StoreError> {
        if epochs == 0 {
            return Err(StoreError::Rejected("retention must be at least one epoch".into()));
        }
        let hash = blake3::hash(&bytes).to_hex();
        let id = BlobId(format!("local_blob_{}", &hash.as_str()[..32]));
        let encoded = BASE64.encode(&bytes);
        self.update(|state| {
            state.blobs.insert(id.clone(), encoded);
            Ok(id.clone())
        })
    }

    async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StoreError> {
        let state = self.load()?;
        let encoded = state
            .blobs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("blob {id}")))?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| StoreError::Unavailable(format!("blob {id} is corrupt: {e}")))
    }
}

#[async_trait]
impl Ledger for DemoStore {
    async fn create_record(&self, transaction: &SignedTransaction) -> Result<RecordId, StoreError> {
        transaction.verify()?;
        self.check_target(transaction, "create_vault_item")?;
        let TransactionKind::CreateVaultItem { blob_id, category } = &transaction.transaction.kind
        else {
            return Err(StoreError::Rejected("expected create_vault_item".into()));
        };
        let blob_id = BlobId(
            String::from_utf8(blob_id.clone())
                .map_err(|_| StoreError::Rejected("blob id is not UTF-8".into()))?,
        );
        let owner = transaction.transaction.sender;
        let category = Category::from_ledger_code(*category);
        let now = self.clock.now_secs();

        self.update(|state| {
            state.next_record = state.next_record.saturating_add(1);
            let id = RecordId(format!("local_{}_{}", now, state.next_record));
            state.records.push(LedgerRecord {
                id: id.clone(),
                owner,
                blob_id,
                category,
                created_at: now,
            });
            Ok(id)
        })
    }

    async fn delete_record(&self, transaction: &SignedTransaction) -> Result<(), StoreError> {
        transaction.verify()?;
        self.check_target(transaction, "delete_vault_item")?;
        let TransactionKind::DeleteVaultItem { record_id } = &transaction.transaction.kind else {
            return Err(StoreError::Rejected("expected delete_vault_item".into()));
        };
        let sender = transaction.transaction.sender;

        self.update(|state| {
            let index = state
                .records
                .iter()
                .position(|r| &r.id == record_id)
                .ok_or_else(|| StoreError::NotFound(format!("record {record_id}")))?;
            if state.records[index].owner != sender {
                return Err(StoreError::Rejected("only the owner can delete a record".into()));
            }
            let removed = state.records.remove(index);
            if !state.records.iter().any(|r| r.blob_id == removed.blob_id) {
                state.blobs.remove(&removed.blob_id);
            }
            Ok(())
        })
    }

    async fn list_records(&self, owner: &OwnerAddress) -> Result<Vec<LedgerRecord>, StoreError> {
        Ok(self
            .load()?
            .records
            .into_iter()
            .filter(|r| &r.owner == owner)
            .collect())
    }

    async fn get_record(&self, id: &RecordId) -> Result<LedgerRecord, StoreError> {
        self.load()?
            .records
            .into_iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("record {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{LocalWallet, TransactionSigner, UnsignedTransaction};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DemoStore {
        DemoStore::open(dir.path(), ContractConfig::default(), Arc::new(ManualClock::new(42)))
    }

    #[tokio::test]
    async fn blob_roundtrip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = store(&dir).put(vec![0, 1, 2, 255], 200).await.unwrap();
        assert!(id.0.starts_with("local_blob_"));
        assert_eq!(store(&dir).get(&id).await.unwrap(), vec![0, 1, 2, 255]);
    }

    #[tokio::test]
    async fn record_lifecycle() {
        let dir = TempDir::new().unwrap();
        let demo = store(&dir);
        let wallet = LocalWallet::generate().unwrap();
        let blob = demo.put(b"cipher".to_vec(), 1).await.unwrap();

        let create = UnsignedTransaction::create_vault_item(
            wallet.address(),
            "0x0",
            "vault",
            &blob,
            Category::Password,
        );
        let id = demo
            .create_record(&wallet.sign_transaction(create).await.unwrap())
            .await
            .unwrap();
        let records = demo.list_records(&wallet.address()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, Category::Password);
        assert_eq!(records[0].created_at, 42);

        let delete = UnsignedTransaction::delete_vault_item(wallet.address(), "0x0", "vault", &id);
        demo.delete_record(&wallet.sign_transaction(delete).await.unwrap())
            .await
            .unwrap();
        assert!(demo.list_records(&wallet.address()).await.unwrap().is_empty());
        assert!(matches!(demo.get(&blob).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_not_discarded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DEMO_FILE), "{ nope").unwrap();
        assert!(matches!(
            store(&dir).get(&BlobId("x".into())).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(fs::read_to_string(dir.path().join(DEMO_FILE)).unwrap(), "{ nope");
    }
}
