//! Caller identities.
//!
//! An [`Identity`] is a 32-byte reference used uniformly for ownership, role
//! grants and authorization checks.  External callers derive theirs from a
//! P-256 public key; internal components derive theirs from a fixed label.

use std::fmt;
use std::str::FromStr;

use p256::ecdsa::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ChainError, Result};
use crate::util;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Identity([u8; 32]);

impl Identity {
    /// The null identity.  Never a valid owner or grantee.
    pub const ZERO: Identity = Identity([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// SHA-256 of the uncompressed SEC1 public key.
    pub fn from_verifying_key(vk: &VerifyingKey) -> Self {
        Self(util::sha256(vk.to_encoded_point(false).as_bytes()))
    }

    /// Identity of an internal component, e.g. `"supply-chain-controller"`.
    pub fn component(label: &str) -> Self {
        Self(util::sha256(format!("pharmachain/component/{label}").as_bytes()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        let h = self.to_hex();
        format!("{}..{}", &h[..8], &h[56..])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.short())
    }
}

impl FromStr for Identity {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| ChainError::InvalidInput(format!("identity is not hex: {e}")))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ChainError::InvalidInput(format!(
                "identity must be 32 bytes (64 hex chars), got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parse_accepts_prefix() {
        let id = Identity::component("test");
        let with_prefix = format!("0x{}", id.to_hex());
        assert_eq!(with_prefix.parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!("abcd".parse::<Identity>().is_err());
        assert!("zz".repeat(32).parse::<Identity>().is_err());
    }

    #[test]
    fn component_identities_are_distinct_and_non_zero() {
        let a = Identity::component("supply-chain-controller");
        let b = Identity::component("verification-service");
        assert_ne!(a, b);
        assert!(!a.is_zero());
        assert!(Identity::ZERO.is_zero());
        assert_eq!(Identity::default(), Identity::ZERO);
    }

    #[test]
    fn serde_uses_hex_string() {
        let id = Identity::component("x");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
