//! Password-derived key strategy.
//!
//! Key = PBKDF2-HMAC-SHA256(password, identity_salt(owner)), AES-256-GCM
//! per entry with a fresh nonce. The envelope prefix is the 16-byte salt.

use async_trait::async_trait;
use owly_crypto_core::kdf::{self, Pbkdf2Params, SALT_LEN};
use owly_crypto_core::symmetric::{self, Envelope};
use owly_crypto_core::CryptoError;
use zeroize::Zeroizing;

use super::{Capability, CryptoEngine, EncryptedBlob, LocalKey, Strategy, UnlockProof};
use crate::entries::VaultEntry;
use crate::error::VaultError;
use crate::identity::OwnerAddress;
use crate::store::LedgerRecord;

/// Local key strategy for one owner.
#[derive(Debug, Clone)]
pub struct LocalKeyEngine {
    owner: OwnerAddress,
    params: Pbkdf2Params,
    salt: [u8; SALT_LEN],
}

impl LocalKeyEngine {
    /// Engine with the production iteration count.
    #[must_use]
    pub fn new(owner: OwnerAddress) -> Self {
        Self::with_iterations(owner, kdf::DEFAULT_ITERATIONS)
    }

    /// Engine with an explicit iteration count.
    ///
    /// No floor is enforced here; [`crate::config::VaultConfig::validate`]
    /// rejects weak counts for configured vaults.
    #[must_use]
    pub fn with_iterations(owner: OwnerAddress, iterations: u32) -> Self {
        Self {
            owner,
            params: Pbkdf2Params { iterations },
            salt: kdf::identity_salt(owner.as_bytes()),
        }
    }

    async fn derive(&self, password: Zeroizing<String>) -> Result<Capability, VaultError> {
        let salt = self.salt;
        let params = self.params;
        let key = tokio::task::spawn_blocking(move || {
            kdf::derive(password.as_bytes(), &salt, &params)
        })
        .await
        .map_err(|e| CryptoError::KeyDerivation(format!("derivation task failed: {e}")))??;
        Ok(Capability::Local(LocalKey::new(key)))
    }
}

fn local_key(capability: &Capability) -> Result<&LocalKey, VaultError> {
    match capability {
        Capability::Local(key) => Ok(key),
        Capability::Identity(_) => Err(VaultError::InvalidRequest(
            "identity capability used with a password vault".into(),
        )),
    }
}

#[async_trait]
impl CryptoEngine for LocalKeyEngine {
    fn strategy(&self) -> Strategy {
        Strategy::Local
    }

    fn owner(&self) -> &OwnerAddress {
        &self.owner
    }

    async fn establish(&self, proof: UnlockProof) -> Result<Capability, VaultError> {
        match proof {
            UnlockProof::Password(password) if password.is_empty() => Err(VaultError::AuthFailure),
            UnlockProof::Password(password) => self.derive(password).await,
            UnlockProof::SignedChallenge(_) => Err(VaultError::Unsupported(
                "this vault unlocks with a password".into(),
            )),
        }
    }

    async fn encrypt(
        &self,
        entry: &VaultEntry,
        capability: &Capability,
    ) -> Result<EncryptedBlob, VaultError> {
        let key = local_key(capability)?;
        let plaintext = entry.to_plaintext()?;
        let sealed = symmetric::encrypt(plaintext.expose(), key.key().expose(), &self.salt)?;
        let envelope = Envelope {
            prefix: self.salt.to_vec(),
            sealed,
        };
        Ok(EncryptedBlob::from_bytes(envelope.to_bytes()))
    }

    async fn decrypt(
        &self,
        blob: &EncryptedBlob,
        capability: &Capability,
        _record: &LedgerRecord,
    ) -> Result<VaultEntry, VaultError> {
        let key = local_key(capability)?;
        let envelope =
            Envelope::from_bytes(blob.as_bytes(), SALT_LEN).map_err(|_| VaultError::Decrypt)?;
        let plaintext = symmetric::decrypt(&envelope.sealed, key.key().expose(), &envelope.prefix)
            .map_err(|_| VaultError::Decrypt)?;
        VaultEntry::from_plaintext(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::Category;
    use crate::store::{BlobId, RecordId};

    const TEST_ITERATIONS: u32 = 1_000;

    fn owner() -> OwnerAddress {
        OwnerAddress::parse("0xa11ce").unwrap()
    }

    fn record() -> LedgerRecord {
        LedgerRecord {
            id: RecordId("0x1".into()),
            owner: owner(),
            blob_id: BlobId("b".into()),
            category: Category::Password,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn roundtrip_under_same_password() {
        let engine = LocalKeyEngine::with_iterations(owner(), TEST_ITERATIONS);
        let cap = engine.establish(UnlockProof::password("hunter22")).await.unwrap();
        let entry = VaultEntry::password("GitHub", "octocat", "pw", 1);
        let blob = engine.encrypt(&entry, &cap).await.unwrap();
        assert_eq!(&blob.as_bytes()[..SALT_LEN], &kdf::identity_salt(owner().as_bytes()));
        assert_eq!(engine.decrypt(&blob, &cap, &record()).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn wrong_password_fails_closed() {
        let engine = LocalKeyEngine::with_iterations(owner(), TEST_ITERATIONS);
        let right = engine.establish(UnlockProof::password("right-one")).await.unwrap();
        let wrong = engine.establish(UnlockProof::password("wrong-one")).await.unwrap();
        let blob = engine
            .encrypt(&VaultEntry::note("n", "secret", vec![], 1), &right)
            .await
            .unwrap();
        assert!(matches!(
            engine.decrypt(&blob, &wrong, &record()).await,
            Err(VaultError::Decrypt)
        ));
    }

    #[tokio::test]
    async fn same_password_different_owner_cannot_decrypt() {
        let alice = LocalKeyEngine::with_iterations(owner(), TEST_ITERATIONS);
        let bob = LocalKeyEngine::with_iterations(OwnerAddress::parse("0xb0b").unwrap(), TEST_ITERATIONS);
        let alice_cap = alice.establish(UnlockProof::password("shared")).await.unwrap();
        let bob_cap = bob.establish(UnlockProof::password("shared")).await.unwrap();
        assert!(!alice_cap.matches(&bob_cap));
        let blob = alice
            .encrypt(&VaultEntry::note("n", "b", vec![], 1), &alice_cap)
            .await
            .unwrap();
        assert!(bob.decrypt(&blob, &bob_cap, &record()).await.is_err());
    }

    #[tokio::test]
    async fn empty_password_is_rejected() {
        let engine = LocalKeyEngine::with_iterations(owner(), TEST_ITERATIONS);
        assert!(matches!(
            engine.establish(UnlockProof::password("")).await,
            Err(VaultError::AuthFailure)
        ));
    }

    #[tokio::test]
    async fn truncated_blob_is_a_decrypt_error() {
        let engine = LocalKeyEngine::with_iterations(owner(), TEST_ITERATIONS);
        let cap = engine.establish(UnlockProof::password("pw")).await.unwrap();
        let blob = EncryptedBlob::from_bytes(vec![0u8; 10]);
        assert!(matches!(
            engine.decrypt(&blob, &cap, &record()).await,
            Err(VaultError::Decrypt)
        ));
    }

    #[tokio::test]
    async fn same_password_yields_matching_capabilities() {
        let engine = LocalKeyEngine::with_iterations(owner(), TEST_ITERATIONS);
        let a = engine.establish(UnlockProof::password("same")).await.unwrap();
        let b = engine.establish(UnlockProof::password("same")).await.unwrap();
        assert!(a.matches(&b));
        assert_eq!(a.expires_at(), None);
    }
}
