//! Account identities.
//!
//! An owner is a 32-byte ledger address, displayed as `0x` followed by 64
//! lowercase hex digits. Short hex input is left-padded with zeros so that
//! `0x2a` and `0x00…2a` name the same account and produce the same bytes
//! for salts and key ids.

use std::fmt;
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Address length in bytes.
pub const ADDRESS_LEN: usize = 32;

/// Domain tag for deriving an address from an Ed25519 public key.
const ADDRESS_DOMAIN: &[u8] = b"owly/address/ed25519/v1";

/// A normalized 32-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerAddress([u8; ADDRESS_LEN]);

impl OwnerAddress {
    /// Wrap raw address bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex address, with or without `0x`, padding short input.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidRequest`] for empty, over-long or
    /// non-hex input.
    pub fn parse(input: &str) -> Result<Self, VaultError> {
        let hex = input.trim();
        let hex = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .unwrap_or(hex);

        let width = ADDRESS_LEN.saturating_mul(2);
        if hex.is_empty() || hex.len() > width {
            return Err(VaultError::InvalidRequest(format!(
                "invalid address length: {input}"
            )));
        }

        let padded = format!("{hex:0>width$}");
        let decoded = HEXLOWER_PERMISSIVE
            .decode(padded.as_bytes())
            .map_err(|_| VaultError::InvalidRequest(format!("invalid address: {input}")))?;
        let bytes: [u8; ADDRESS_LEN] = decoded
            .try_into()
            .map_err(|_| VaultError::InvalidRequest(format!("invalid address: {input}")))?;
        Ok(Self(bytes))
    }

    /// Address owned by an Ed25519 public key.
    #[must_use]
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ADDRESS_DOMAIN);
        hasher.update(public_key);
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw address bytes (the identity used for salts and key ids).
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// `0x`-prefixed, 64-digit lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", HEXLOWER.encode(&self.0))
    }
}

impl fmt::Display for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerAddress({})", self.to_hex())
    }
}

impl FromStr for OwnerAddress {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OwnerAddress {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OwnerAddress> for String {
    fn from(value: OwnerAddress) -> Self {
        value.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_address_is_left_padded() {
        let addr = OwnerAddress::parse("0x2a").unwrap();
        let mut expected = [0u8; 32];
        expected[31] = 0x2a;
        assert_eq!(addr.as_bytes(), &expected);
        assert_eq!(
            addr.to_hex(),
            "0x000000000000000000000000000000000000000000000000000000000000002a"
        );
    }

    #[test]
    fn prefix_is_optional_and_case_insensitive() {
        let a = OwnerAddress::parse("0xABCDEF").unwrap();
        let b = OwnerAddress::parse("abcdef").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn odd_length_hex_is_padded() {
        let addr = OwnerAddress::parse("0xabc").unwrap();
        assert_eq!(addr.as_bytes()[30], 0x0a);
        assert_eq!(addr.as_bytes()[31], 0xbc);
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(OwnerAddress::parse("").is_err());
        assert!(OwnerAddress::parse("0x").is_err());
        assert!(OwnerAddress::parse("0xzz").is_err());
        assert!(OwnerAddress::parse(&format!("0x{}", "1".repeat(65))).is_err());
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let addr = OwnerAddress::from_bytes([0x5c; 32]);
        assert_eq!(OwnerAddress::parse(&addr.to_string()).unwrap(), addr);
    }

    #[test]
    fn serde_uses_hex_string() {
        let addr = OwnerAddress::parse("0x01").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: OwnerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn public_key_addresses_are_stable() {
        let a = OwnerAddress::from_public_key(&[1u8; 32]);
        let b = OwnerAddress::from_public_key(&[1u8; 32]);
        let c = OwnerAddress::from_public_key(&[2u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
