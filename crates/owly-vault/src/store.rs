//! Collaborator seams: blob store, ledger and transaction signer.
//!
//! The vault never talks to a network directly. Encrypted blobs go to a
//! [`BlobStore`], the owner-to-blob index lives on a [`Ledger`], and every
//! ledger mutation is a [`SignedTransaction`] produced by an external
//! [`TransactionSigner`] (the user's wallet).

use std::fmt;

use async_trait::async_trait;
use owly_crypto_core::signing::{self, SigningKeyPair};
use serde::{Deserialize, Serialize};

use crate::entries::Category;
use crate::error::StoreError;
use crate::identity::OwnerAddress;

// ---------------------------------------------------------------------------
// Identifiers and records
// ---------------------------------------------------------------------------

/// Content identifier returned by the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub String);

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger record binding an owner to a blob. Holds no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: RecordId,
    pub owner: OwnerAddress,
    pub blob_id: BlobId,
    pub category: Category,
    /// Unix seconds, assigned by the ledger.
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Ledger call carried by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum TransactionKind {
    /// `create_vault_item(blob_id bytes, category code)`.
    CreateVaultItem { blob_id: Vec<u8>, category: u8 },
    /// `delete_vault_item(record)`.
    DeleteVaultItem { record_id: RecordId },
}

/// A ledger call awaiting the owner's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub sender: OwnerAddress,
    /// Fully-qualified entry point, `{package}::{module}::{function}`.
    pub target: String,
    pub kind: TransactionKind,
}

impl UnsignedTransaction {
    /// Build a `create_vault_item` call.
    #[must_use]
    pub fn create_vault_item(
        sender: OwnerAddress,
        package_id: &str,
        module: &str,
        blob_id: &BlobId,
        category: Category,
    ) -> Self {
        Self {
            sender,
            target: format!("{package_id}::{module}::create_vault_item"),
            kind: TransactionKind::CreateVaultItem {
                blob_id: blob_id.0.as_bytes().to_vec(),
                category: category.ledger_code(),
            },
        }
    }

    /// Build a `delete_vault_item` call.
    #[must_use]
    pub fn delete_vault_item(
        sender: OwnerAddress,
        package_id: &str,
        module: &str,
        record_id: &RecordId,
    ) -> Self {
        Self {
            sender,
            target: format!("{package_id}::{module}::delete_vault_item"),
            kind: TransactionKind::DeleteVaultItem {
                record_id: record_id.clone(),
            },
        }
    }

    /// Canonical bytes covered by the signature.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] if the transaction cannot be encoded.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Rejected(format!("encode transaction: {e}")))
    }
}

/// A transaction signed by its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Check that the signing key owns the sender address and that the
    /// signature covers the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] on either mismatch.
    pub fn verify(&self) -> Result<(), StoreError> {
        if OwnerAddress::from_public_key(&self.public_key) != self.transaction.sender {
            return Err(StoreError::Rejected(
                "signer does not own the sender address".into(),
            ));
        }
        let message = self.transaction.signing_bytes()?;
        signing::verify(&self.public_key, &message, &self.signature)
            .map_err(|_| StoreError::Rejected("invalid transaction signature".into()))
    }
}

/// Signature over an arbitrary message (used for session challenges).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalSignature {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Wallet that signs on behalf of an owner.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Address this signer controls.
    fn address(&self) -> OwnerAddress;

    /// Sign a ledger transaction.
    async fn sign_transaction(
        &self,
        transaction: UnsignedTransaction,
    ) -> Result<SignedTransaction, StoreError>;

    /// Sign an off-ledger message.
    async fn sign_personal_message(&self, message: &[u8]) -> Result<PersonalSignature, StoreError>;
}

/// Content-addressed blob storage with time-limited retention.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` for `epochs` retention periods.
    async fn put(&self, bytes: Vec<u8>, epochs: u32) -> Result<BlobId, StoreError>;

    /// Fetch a blob. Expired or unknown blobs are [`StoreError::NotFound`].
    async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StoreError>;
}

/// Append-only index of owner records.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Execute a signed `create_vault_item` and return the new record id.
    async fn create_record(&self, transaction: &SignedTransaction) -> Result<RecordId, StoreError>;

    /// Execute a signed `delete_vault_item`.
    async fn delete_record(&self, transaction: &SignedTransaction) -> Result<(), StoreError>;

    /// All records owned by `owner`.
    async fn list_records(&self, owner: &OwnerAddress) -> Result<Vec<LedgerRecord>, StoreError>;

    /// A single record.
    async fn get_record(&self, id: &RecordId) -> Result<LedgerRecord, StoreError>;
}

// ---------------------------------------------------------------------------
// Local wallet
// ---------------------------------------------------------------------------

/// In-process Ed25519 wallet.
pub struct LocalWallet {
    keys: SigningKeyPair,
    address: OwnerAddress,
}

impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalWallet {
    /// Wrap an existing key pair.
    #[must_use]
    pub fn new(keys: SigningKeyPair) -> Self {
        let address = OwnerAddress::from_public_key(keys.public_key());
        Self { keys, address }
    }

    /// Fresh random wallet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if key generation fails.
    pub fn generate() -> Result<Self, StoreError> {
        let keys = SigningKeyPair::generate()
            .map_err(|e| StoreError::Unavailable(format!("wallet key generation: {e}")))?;
        Ok(Self::new(keys))
    }

    fn sign(&self, message: &[u8]) -> Result<PersonalSignature, StoreError> {
        let signature = self
            .keys
            .sign(message)
            .map_err(|e| StoreError::Rejected(format!("wallet signing failed: {e}")))?;
        Ok(PersonalSignature {
            public_key: self.keys.public_key().to_vec(),
            signature: signature.to_vec(),
        })
    }
}

#[async_trait]
impl TransactionSigner for LocalWallet {
    fn address(&self) -> OwnerAddress {
        self.address
    }

    async fn sign_transaction(
        &self,
        transaction: UnsignedTransaction,
    ) -> Result<SignedTransaction, StoreError> {
        if transaction.sender != self.address {
            return Err(StoreError::Rejected(format!(
                "wallet {} cannot sign for {}",
                self.address, transaction.sender
            )));
        }
        let PersonalSignature {
            public_key,
            signature,
        } = self.sign(&transaction.signing_bytes()?)?;
        Ok(SignedTransaction {
            transaction,
            public_key,
            signature,
        })
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<PersonalSignature, StoreError> {
        self.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_tx(wallet: &LocalWallet) -> UnsignedTransaction {
        UnsignedTransaction::create_vault_item(
            wallet.address(),
            "0xpkg",
            "vault",
            &BlobId("blob-1".into()),
            Category::Password,
        )
    }

    #[tokio::test]
    async fn signed_transaction_verifies() {
        let wallet = LocalWallet::generate().unwrap();
        let signed = wallet.sign_transaction(create_tx(&wallet)).await.unwrap();
        signed.verify().unwrap();
        assert_eq!(signed.transaction.target, "0xpkg::vault::create_vault_item");
        assert_eq!(
            signed.transaction.kind,
            TransactionKind::CreateVaultItem {
                blob_id: b"blob-1".to_vec(),
                category: 1
            }
        );
    }

    #[tokio::test]
    async fn tampered_transaction_is_rejected() {
        let wallet = LocalWallet::generate().unwrap();
        let mut signed = wallet.sign_transaction(create_tx(&wallet)).await.unwrap();
        signed.transaction.kind = TransactionKind::CreateVaultItem {
            blob_id: b"other".to_vec(),
            category: 0,
        };
        assert!(matches!(signed.verify(), Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn foreign_key_cannot_claim_sender() {
        let alice = LocalWallet::generate().unwrap();
        let mallory = LocalWallet::generate().unwrap();
        let mut signed = mallory.sign_transaction(create_tx(&mallory)).await.unwrap();
        signed.transaction.sender = alice.address();
        assert!(signed.verify().is_err());
    }

    #[tokio::test]
    async fn wallet_refuses_other_senders() {
        let alice = LocalWallet::generate().unwrap();
        let bob = LocalWallet::generate().unwrap();
        assert!(bob.sign_transaction(create_tx(&alice)).await.is_err());
    }
}
