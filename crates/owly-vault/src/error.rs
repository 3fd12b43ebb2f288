//! Vault error types for `owly-vault`.

use owly_crypto_core::CryptoError;
use thiserror::Error;

/// Errors reported by external collaborators (blob store, ledger,
/// key-release servers, wallet signer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested blob or record does not exist (or has expired).
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport or availability failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request (bad signature, policy denial).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// A time-boxed identity token is past its TTL.
    #[error("session token expired")]
    Expired,
}

/// Errors produced by vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Cryptographic operation failed (delegated from crypto-core).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The unlock or rotation proof was rejected.
    #[error("authentication failed")]
    AuthFailure,

    /// Ciphertext did not authenticate under the supplied capability.
    #[error("could not decrypt entry")]
    Decrypt,

    /// No live session; the vault is locked.
    #[error("vault is locked")]
    NotUnlocked,

    /// The remote capability hit its TTL; the caller must re-authenticate.
    #[error("session expired, unlock again")]
    SessionExpired,

    /// Ledger record (or another addressed object) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Ledger record exists but its blob is gone from the blob store.
    #[error("entry {record_id} is orphaned: blob {blob_id} is no longer available")]
    Orphaned {
        /// The dangling ledger record.
        record_id: String,
        /// The blob it points at.
        blob_id: String,
    },

    /// Blob store or ledger transport/availability failure.
    #[error("store error: {0}")]
    Store(String),

    /// Password rotation stopped on the first failing item.
    #[error("password rotation aborted after {items_migrated}/{total} entries: {reason}")]
    AbortedRotation {
        /// What failed.
        reason: String,
        /// Entries already re-encrypted under the new password.
        items_migrated: usize,
        /// Entries the rotation set out to migrate.
        total: usize,
    },

    /// Caller input was invalid (same password twice, bad timeout, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The configured strategy does not support this operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Entry or configuration (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the filesystem (config, demo store).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Unavailable(msg) | StoreError::Rejected(msg) => Self::Store(msg),
            StoreError::Expired => Self::SessionExpired,
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl VaultError {
    /// Machine-readable code for callers.
    ///
    /// `AuthFailure` and `Decrypt` deliberately share one code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthFailure | Self::Decrypt | Self::Crypto(CryptoError::Decryption) => {
                "UNLOCK_FAILED"
            }
            Self::NotUnlocked => "VAULT_LOCKED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Orphaned { .. } => "ORPHANED",
            Self::Store(_) => "STORE_UNAVAILABLE",
            Self::AbortedRotation { .. } => "ROTATION_ABORTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::Crypto(_) | Self::Serialization(_) | Self::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// User-facing message. Internal details never leak.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthFailure | Self::Decrypt | Self::Crypto(CryptoError::Decryption) => {
                "Could not unlock or decrypt your vault. Check your password and try again.".into()
            }
            Self::NotUnlocked => "Your vault is locked. Unlock it to continue.".into(),
            Self::SessionExpired => "Your session has expired. Please unlock again.".into(),
            Self::NotFound(_) => "This entry no longer exists.".into(),
            Self::Orphaned { .. } => {
                "This entry's encrypted data has expired from storage. You can remove it during cleanup."
                    .into()
            }
            Self::Store(_) => "Storage is unreachable right now. Please try again.".into(),
            Self::AbortedRotation {
                items_migrated,
                total,
                ..
            } => format!(
                "Password change stopped: {items_migrated} of {total} entries now use the new password; the rest still use the old one."
            ),
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Unsupported(_) => "This operation is not available for this vault.".into(),
            Self::Crypto(_) | Self::Serialization(_) | Self::Io(_) => {
                "Something went wrong. Please try again.".into()
            }
        }
    }

    /// Whether the caller can resolve the condition without data loss
    /// (re-unlock, cleanup, retry).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotUnlocked | Self::SessionExpired | Self::Orphaned { .. } | Self::Store(_)
        )
    }
}
