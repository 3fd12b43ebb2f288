//! Entry data model and plaintext serialization.
//!
//! Entries serialize to a JSON object whose `type` field selects the payload
//! kind (`"note"` or `"password"`), with `created_at` / `updated_at` next to
//! the payload fields. That JSON is the plaintext sealed into a blob.

use std::fmt;

use owly_crypto_core::SecretBuffer;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Entry kind recorded on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Free-form note.
    Note,
    /// Login credential.
    Password,
}

impl Category {
    /// Numeric code stored in ledger records.
    #[must_use]
    pub const fn ledger_code(self) -> u8 {
        match self {
            Self::Note => 0,
            Self::Password => 1,
        }
    }

    /// Decode a ledger code. Unknown codes are treated as notes.
    #[must_use]
    pub const fn from_ledger_code(code: u8) -> Self {
        match code {
            1 => Self::Password,
            _ => Self::Note,
        }
    }

    /// Lowercase name, matching the payload `type` tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Category-specific entry content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryPayload {
    /// A note with optional styling and attached images.
    Note {
        title: String,
        body: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(
            rename = "backgroundColor",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        background_color: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        images: Option<Vec<String>>,
    },
    /// A credential for a site or service.
    Password {
        title: String,
        username: String,
        #[serde(rename = "password")]
        secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
}

impl EntryPayload {
    /// Ledger category for this payload.
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Note { .. } => Category::Note,
            Self::Password { .. } => Category::Password,
        }
    }

    /// Display title.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Note { title, .. } | Self::Password { title, .. } => title,
        }
    }
}

impl Drop for EntryPayload {
    fn drop(&mut self) {
        match self {
            Self::Note {
                body,
                images,
                ..
            } => {
                body.zeroize();
                if let Some(images) = images {
                    images.iter_mut().for_each(Zeroize::zeroize);
                }
            }
            Self::Password { secret, notes, .. } => {
                secret.zeroize();
                if let Some(notes) = notes {
                    notes.zeroize();
                }
            }
        }
    }
}

impl fmt::Debug for EntryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Note { title, tags, .. } => f
                .debug_struct("Note")
                .field("title", title)
                .field("tags", tags)
                .finish_non_exhaustive(),
            Self::Password {
                title, username, ..
            } => f
                .debug_struct("Password")
                .field("title", title)
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

// ---------------------------------------------------------------------------
// VaultEntry
// ---------------------------------------------------------------------------

/// A decrypted vault entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    #[serde(flatten)]
    pub payload: EntryPayload,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds.
    pub updated_at: u64,
}

impl VaultEntry {
    /// Build a note entry stamped at `now`.
    #[must_use]
    pub fn note(title: impl Into<String>, body: impl Into<String>, tags: Vec<String>, now: u64) -> Self {
        Self {
            payload: EntryPayload::Note {
                title: title.into(),
                body: body.into(),
                tags,
                background_color: None,
                images: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a password entry stamped at `now`.
    #[must_use]
    pub fn password(
        title: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            payload: EntryPayload::Password {
                title: title.into(),
                username: username.into(),
                secret: secret.into(),
                url: None,
                notes: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Ledger category of this entry.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.payload.category()
    }

    /// Display title.
    #[must_use]
    pub fn title(&self) -> &str {
        self.payload.title()
    }

    /// Serialize to the JSON plaintext that gets sealed.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Serialization`] if JSON encoding fails.
    pub fn to_plaintext(&self) -> Result<SecretBuffer, VaultError> {
        let json = serde_json::to_vec(self)?;
        Ok(SecretBuffer::from_vec(json))
    }

    /// Parse decrypted JSON plaintext.
    ///
    /// Authenticated plaintext that is not a valid entry is reported as
    /// [`VaultError::Decrypt`]: callers never see partial content.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Decrypt`] on malformed JSON.
    pub fn from_plaintext(plaintext: &SecretBuffer) -> Result<Self, VaultError> {
        serde_json::from_slice(plaintext.expose()).map_err(|e| {
            tracing::warn!("decrypted entry is not valid JSON: {e}");
            VaultError::Decrypt
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_ledger_codes() {
        assert_eq!(Category::Note.ledger_code(), 0);
        assert_eq!(Category::Password.ledger_code(), 1);
        assert_eq!(Category::from_ledger_code(1), Category::Password);
        assert_eq!(Category::from_ledger_code(0), Category::Note);
        assert_eq!(Category::from_ledger_code(7), Category::Note);
    }

    #[test]
    fn password_json_shape() {
        let entry = VaultEntry::password("GitHub", "octocat", "hunter2", 100);
        let json: serde_json::Value = serde_json::from_slice(entry.to_plaintext().unwrap().expose()).unwrap();
        assert_eq!(json["type"], "password");
        assert_eq!(json["password"], "hunter2");
        assert_eq!(json["username"], "octocat");
        assert_eq!(json["created_at"], 100);
        assert!(json.get("url").is_none());
    }

    #[test]
    fn note_json_uses_camel_case_background() {
        let mut entry = VaultEntry::note("Groceries", "milk", vec!["home".into()], 5);
        if let EntryPayload::Note {
            background_color, ..
        } = &mut entry.payload
        {
            *background_color = Some("#ffeeaa".into());
        }
        let json: serde_json::Value = serde_json::from_slice(entry.to_plaintext().unwrap().expose()).unwrap();
        assert_eq!(json["type"], "note");
        assert_eq!(json["backgroundColor"], "#ffeeaa");
        assert_eq!(json["tags"][0], "home");
    }

    #[test]
    fn plaintext_roundtrip() {
        let entry = VaultEntry::note("t", "b", vec![], 9);
        let back = VaultEntry::from_plaintext(&entry.to_plaintext().unwrap()).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn note_without_optional_fields_parses() {
        let raw = br#"{"type":"note","title":"t","body":"b","created_at":1,"updated_at":2}"#;
        let entry = VaultEntry::from_plaintext(&SecretBuffer::new(raw)).unwrap();
        assert_eq!(entry.category(), Category::Note);
        assert_eq!(entry.title(), "t");
        assert_eq!(entry.updated_at, 2);
    }

    #[test]
    fn malformed_plaintext_is_a_decrypt_error() {
        let err = VaultEntry::from_plaintext(&SecretBuffer::new(b"not json")).unwrap_err();
        assert!(matches!(err, VaultError::Decrypt));
    }

    #[test]
    fn debug_hides_secrets() {
        let entry = VaultEntry::password("Bank", "me", "s3cr3t-value", 0);
        let debug = format!("{entry:?}");
        assert!(debug.contains("Bank"));
        assert!(!debug.contains("s3cr3t-value"));
    }
}
