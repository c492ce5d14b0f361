use thiserror::Error;

use crate::types::Address;

pub type SeResult<T> = Result<T, SelfEncryptionError>;

/// Every failure a self-encryption operation can end in.
///
/// All variants are terminal for the operation that raised them; nothing in
/// the codec retries.
#[derive(Debug, Error)]
pub enum SelfEncryptionError {
    #[error("chunk {index} is too big: {size} bytes (max {max})")]
    ChunkTooBig { index: usize, size: usize, max: usize },

    #[error("payload too small to self-encrypt: {size} bytes (minimum {min})")]
    PayloadTooSmall { size: usize, min: usize },

    #[error("chunk not found: {address}: {reason}")]
    ChunkNotFound { address: Address, reason: String },

    #[error("chunk corrupted: expected {expected}, fetched bytes hash to {actual}")]
    ChunkCorrupted { expected: Address, actual: Address },

    #[error("integrity mismatch at chunk {index} ({address}): {reason}")]
    IntegrityMismatch {
        index: usize,
        address: Address,
        reason: String,
    },

    #[error("data map decode error: {0}")]
    DataMapDecode(String),

    #[error("data map nesting exceeds maximum depth of {max_depth}")]
    DataMapTooDeep { max_depth: u32 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid chunk boundaries: {0}")]
    InvalidBoundaries(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("failed to store chunk {address}: {source}")]
    Store {
        address: Address,
        #[source]
        source: StoreError,
    },
}

/// Failure reported by a chunk store.
///
/// The codec never inspects these beyond wrapping them into
/// [`SelfEncryptionError::ChunkNotFound`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("no chunk stored at {0}")]
    Missing(Address),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl SelfEncryptionError {
    /// Wrap a fetch failure for `address`.
    pub fn not_found(address: Address, err: StoreError) -> Self {
        Self::ChunkNotFound {
            address,
            reason: err.to_string(),
        }
    }
}
