use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{SeResult, SelfEncryptionError};

/// Length of an address in bytes
pub const ADDRESS_LEN: usize = 32;

/// Content address: the BLAKE3 digest of a byte blob.
///
/// Used both for encrypted chunks (hash of the stored bytes) and for the
/// pre-encryption hashes that feed ring key derivation. Serialized as a
/// 64-char lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn from_array(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an address from a raw slice; it must be exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> SeResult<Self> {
        let array: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            SelfEncryptionError::InvalidAddress(format!(
                "address must be exactly {ADDRESS_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> SeResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| SelfEncryptionError::InvalidAddress(format!("invalid hex '{s}': {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl From<blake3::Hash> for Address {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.to_hex()[..12])
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
