pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{ChunkStrategy, ChunkingConfig, DataMapConfig, SelfEncConfig};
pub use error::{SeResult, SelfEncryptionError, StoreError};
pub use store::{ChunkStore, MemoryStore};
pub use types::Address;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Bytes an encrypted chunk carries on top of its raw payload:
/// one frame tag (raw / zstd) plus the AEAD tag.
pub const CHUNK_OVERHEAD: usize = 1 + TAG_SIZE;
