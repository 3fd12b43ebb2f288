//! Vault configuration, stored as plain JSON next to the app data.
//!
//! Nothing here is secret: the file names the protection strategy, the
//! ledger contract and the session timings. It is readable before unlock.

use std::fs;
use std::path::Path;

use owly_crypto_core::kdf::{DEFAULT_ITERATIONS, MIN_ITERATIONS};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Inactivity timeouts offered to users, in minutes.
pub const AUTO_LOCK_PRESETS: [u32; 5] = [1, 5, 15, 30, 60];

/// Accepted inactivity timeout range, in minutes.
pub const AUTO_LOCK_RANGE: std::ops::RangeInclusive<u32> = 1..=60;

// ── Top-level config ───────────────────────────────────────────────

/// Persisted vault settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    /// Minutes of inactivity before the vault auto-locks (1–60).
    #[serde(default = "default_auto_lock_minutes")]
    pub auto_lock_minutes: u32,

    /// Seconds of remaining time at which the lock status turns to a warning.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold_secs: u64,

    /// Retention periods requested for each uploaded blob.
    #[serde(default = "default_storage_epochs")]
    pub storage_epochs: u32,

    /// Target network.
    #[serde(default)]
    pub network: Network,

    /// Ledger contract hosting the vault records.
    #[serde(default)]
    pub contract: ContractConfig,

    /// How entry keys are protected.
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            auto_lock_minutes: default_auto_lock_minutes(),
            warning_threshold_secs: default_warning_threshold(),
            storage_epochs: default_storage_epochs(),
            network: Network::default(),
            contract: ContractConfig::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

const fn default_auto_lock_minutes() -> u32 {
    15
}
const fn default_warning_threshold() -> u64 {
    60
}
const fn default_storage_epochs() -> u32 {
    200
}

/// Deployment network.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

// ── Contract ───────────────────────────────────────────────────────

/// Ledger package and module that own vault records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    #[serde(default = "default_package_id")]
    pub package_id: String,
    #[serde(default = "default_module_name")]
    pub module_name: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            package_id: default_package_id(),
            module_name: default_module_name(),
        }
    }
}

fn default_package_id() -> String {
    "0x0".into()
}
fn default_module_name() -> String {
    "vault".into()
}

// ── Strategy ───────────────────────────────────────────────────────

/// Key-protection strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum StrategyConfig {
    /// Password-derived key, PBKDF2-HMAC-SHA256.
    #[serde(rename_all = "camelCase")]
    Local {
        #[serde(default = "default_iterations")]
        iterations: u32,
    },
    /// Identity-bound keys released by threshold key servers.
    #[serde(rename_all = "camelCase")]
    IdentityBound {
        #[serde(default = "default_threshold")]
        threshold: usize,
        #[serde(default = "default_ttl_minutes")]
        ttl_minutes: u32,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Local {
            iterations: default_iterations(),
        }
    }
}

const fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}
const fn default_threshold() -> usize {
    1
}
const fn default_ttl_minutes() -> u32 {
    15
}

// ── Validation & file I/O ──────────────────────────────────────────

const CONFIG_FILE: &str = "owly.json";

impl VaultConfig {
    /// Reject values the vault cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidRequest`] naming the offending field.
    pub fn validate(&self) -> Result<(), VaultError> {
        validate_auto_lock_minutes(self.auto_lock_minutes)?;
        if self.storage_epochs == 0 {
            return Err(VaultError::InvalidRequest(
                "storageEpochs must be at least 1".into(),
            ));
        }
        if self.contract.package_id.trim().is_empty() || self.contract.module_name.trim().is_empty()
        {
            return Err(VaultError::InvalidRequest(
                "contract packageId and moduleName are required".into(),
            ));
        }
        match self.strategy {
            StrategyConfig::Local { iterations } if iterations < MIN_ITERATIONS => {
                Err(VaultError::InvalidRequest(format!(
                    "PBKDF2 iterations must be at least {MIN_ITERATIONS}, got {iterations}"
                )))
            }
            StrategyConfig::IdentityBound { threshold, .. } if threshold == 0 => Err(
                VaultError::InvalidRequest("key server threshold must be at least 1".into()),
            ),
            StrategyConfig::IdentityBound { ttl_minutes, .. } if ttl_minutes == 0 => Err(
                VaultError::InvalidRequest("session TTL must be at least 1 minute".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Load from `{data_dir}/owly.json`.
    ///
    /// Returns [`Default::default()`] when the file is missing or contains
    /// invalid JSON.
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(CONFIG_FILE);
        fs::read_to_string(&path).map_or_else(
            |_| Self::default(),
            |contents| {
                serde_json::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("ignoring corrupt {CONFIG_FILE}: {e}");
                    Self::default()
                })
            },
        )
    }

    /// Persist to `{data_dir}/owly.json` (write `.tmp`, then rename).
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the directory is missing or the write or
    /// rename fails.
    pub fn save(&self, data_dir: &Path) -> std::io::Result<()> {
        let path = data_dir.join(CONFIG_FILE);
        let tmp = data_dir.join(".owly.json.tmp");

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(&tmp, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Check an inactivity timeout against [`AUTO_LOCK_RANGE`].
///
/// # Errors
///
/// Returns [`VaultError::InvalidRequest`] when out of range.
pub fn validate_auto_lock_minutes(minutes: u32) -> Result<(), VaultError> {
    if AUTO_LOCK_RANGE.contains(&minutes) {
        Ok(())
    } else {
        Err(VaultError::InvalidRequest(format!(
            "auto-lock timeout must be between 1 and 60 minutes, got {minutes}"
        )))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
