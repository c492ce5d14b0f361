//! Data map: the manifest needed to reconstruct a self-encrypted payload
//!
//! A map is an ordered list of [`ChunkInfo`] entries, one per chunk:
//! - address of the encrypted chunk on the store
//! - raw (pre-encryption) size
//! - the pre-encryption hashes of the two ring neighbours, enough to
//!   re-derive the chunk key without touching any other chunk
//!
//! Maps that serialize above the configured threshold are themselves
//! self-encrypted, yielding a [`DataMap::Pointer`] one level up whose chunks
//! decrypt to the serialized bytes of the level below.
//!
//! Wire format: a versioned JSON envelope
//! ```text
//! {"version":1,"kind":"direct"|"pointer","level":N,"data_size":S,"chunks":[...]}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use selfenc_core::{Address, SeResult, SelfEncryptionError};

/// Current wire format version
pub const DATA_MAP_VERSION: u32 = 1;

/// A single chunk entry in the data map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkInfo {
    /// Address of the encrypted chunk (BLAKE3 of the stored bytes)
    pub address: Address,
    /// Size of the chunk before compression and encryption
    pub raw_size: u64,
    /// Pre-encryption hashes of chunks (i+1) % n and (i+2) % n
    pub key_refs: [Address; 2],
}

/// Manifest of a self-encrypted payload, direct or one-or-more levels removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMap {
    /// Chunks decrypt to the payload itself
    Direct {
        data_size: u64,
        chunks: Vec<ChunkInfo>,
    },
    /// Chunks decrypt to the serialized map of level `level - 1`
    Pointer {
        level: u32,
        data_size: u64,
        chunks: Vec<ChunkInfo>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireKind {
    Direct,
    Pointer,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireDataMap {
    version: u32,
    kind: WireKind,
    #[serde(default, skip_serializing_if = "is_zero")]
    level: u32,
    data_size: u64,
    chunks: Vec<ChunkInfo>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl DataMap {
    pub fn direct(data_size: u64, chunks: Vec<ChunkInfo>) -> Self {
        Self::Direct { data_size, chunks }
    }

    /// 0 for a direct map, otherwise the number of levels above the payload
    pub fn level(&self) -> u32 {
        match self {
            Self::Direct { .. } => 0,
            Self::Pointer { level, .. } => *level,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer { .. })
    }

    /// Bytes the chunks of this level decrypt to
    pub fn data_size(&self) -> u64 {
        match self {
            Self::Direct { data_size, .. } | Self::Pointer { data_size, .. } => *data_size,
        }
    }

    pub fn chunks(&self) -> &[ChunkInfo] {
        match self {
            Self::Direct { chunks, .. } | Self::Pointer { chunks, .. } => chunks,
        }
    }

    pub fn serialize(&self) -> SeResult<Vec<u8>> {
        let wire = WireDataMap {
            version: DATA_MAP_VERSION,
            kind: match self {
                Self::Direct { .. } => WireKind::Direct,
                Self::Pointer { .. } => WireKind::Pointer,
            },
            level: self.level(),
            data_size: self.data_size(),
            chunks: self.chunks().to_vec(),
        };
        serde_json::to_vec(&wire)
            .map_err(|e| SelfEncryptionError::DataMapDecode(format!("data map encoding: {e}")))
    }

    pub fn deserialize(bytes: &[u8]) -> SeResult<Self> {
        let wire: WireDataMap = serde_json::from_slice(bytes)
            .map_err(|e| SelfEncryptionError::DataMapDecode(format!("malformed data map: {e}")))?;

        if wire.version != DATA_MAP_VERSION {
            return Err(SelfEncryptionError::DataMapDecode(format!(
                "unsupported data map version {} (expected {DATA_MAP_VERSION})",
                wire.version
            )));
        }

        let map = match wire.kind {
            WireKind::Direct if wire.level != 0 => {
                return Err(SelfEncryptionError::DataMapDecode(format!(
                    "direct data map carries level {}",
                    wire.level
                )));
            }
            WireKind::Direct => Self::Direct {
                data_size: wire.data_size,
                chunks: wire.chunks,
            },
            WireKind::Pointer => Self::Pointer {
                level: wire.level,
                data_size: wire.data_size,
                chunks: wire.chunks,
            },
        };
        map.validate()?;
        Ok(map)
    }

    /// Structural checks shared by decoding and reconstruction.
    pub fn validate(&self) -> SeResult<()> {
        let chunks = self.chunks();

        if let Self::Pointer { level, .. } = self {
            if *level == 0 {
                return Err(SelfEncryptionError::DataMapDecode(
                    "pointer data map at level 0".into(),
                ));
            }
            if chunks.is_empty() {
                return Err(SelfEncryptionError::DataMapDecode(
                    "pointer data map without chunks".into(),
                ));
            }
        }

        if let Some(i) = chunks.iter().position(|c| c.raw_size == 0) {
            return Err(SelfEncryptionError::DataMapDecode(format!(
                "chunk {i} records a zero raw size"
            )));
        }

        let total = chunks
            .iter()
            .try_fold(0u64, |acc, c| acc.checked_add(c.raw_size))
            .ok_or_else(|| SelfEncryptionError::DataMapDecode("chunk sizes overflow".into()))?;
        if total != self.data_size() {
            return Err(SelfEncryptionError::DataMapDecode(format!(
                "chunk sizes sum to {total} but data map records {} bytes",
                self.data_size()
            )));
        }
        Ok(())
    }
}

/// A serialized top-level data map, handled like a small chunk.
///
/// This is what callers keep to get their data back. Its address is only a
/// client-side handle unless the payload is published, in which case the map
/// is stored under that address (see [`crate::public`]).
#[derive(Clone, PartialEq, Eq)]
pub struct DataMapChunk {
    content: Bytes,
}

impl DataMapChunk {
    pub fn from_map(map: &DataMap) -> SeResult<Self> {
        Ok(Self {
            content: Bytes::from(map.serialize()?),
        })
    }

    /// Wrap serialized map bytes, rejecting anything that does not decode.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> SeResult<Self> {
        let content = bytes.into();
        DataMap::deserialize(&content)?;
        Ok(Self { content })
    }

    pub fn from_hex(hex: &str) -> SeResult<Self> {
        let bytes = hex::decode(hex.trim())
            .map_err(|e| SelfEncryptionError::DataMapDecode(format!("invalid hex: {e}")))?;
        Self::from_bytes(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.content)
    }

    pub fn to_map(&self) -> SeResult<DataMap> {
        DataMap::deserialize(&self.content)
    }

    pub fn address(&self) -> Address {
        selfenc_chunks::hash_bytes(&self.content)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.content
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }
}

impl std::fmt::Debug for DataMapChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMapChunk")
            .field("address", &self.address())
            .field("size", &self.content.len())
            .finish()
    }
}
