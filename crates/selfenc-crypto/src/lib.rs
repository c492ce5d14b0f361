//! selfenc-crypto: convergent self-encryption of payloads
//!
//! Architecture: Chunk-then-Encrypt, keyed by the content itself
//!
//! Pipeline: payload → chunk (>= 3) → BLAKE3 each raw chunk → zstd frame →
//! XChaCha20-Poly1305 under a ring-derived key → BLAKE3 the ciphertext → store
//!
//! Key ring:
//! ```text
//! chunk i of n
//!   ├── key_refs = [hash(raw[(i+1) % n]), hash(raw[(i+2) % n])]
//!   └── key, nonce = HKDF-SHA256(key_refs, info = i || payload length)
//! ```
//!
//! The resulting [`DataMap`] is the only secret: whoever holds it can fetch and
//! decrypt the chunks; whoever holds only chunks learns nothing. Maps larger
//! than the configured threshold are self-encrypted again into pointer levels.

pub mod bundle;
pub mod cipher;
pub mod data_map;
pub mod encryptor;
pub mod keys;
pub mod public;
pub mod reconstruct;
pub mod stream;

pub use bundle::{decrypt_bundle, encrypt_to_bundle, EncryptedData};
pub use data_map::{ChunkInfo, DataMap, DataMapChunk, DATA_MAP_VERSION};
pub use encryptor::{
    decrypt_chunk, encrypt, encrypt_and_store, encrypt_chunks, shrink, store_chunks, Chunk,
};
pub use keys::{derive_chunk_keys, neighbours, ChunkKeys};
pub use public::{decrypt_public, encrypt_public, fetch_data_map, open_data_map, store_data_map};
pub use reconstruct::{
    decrypt, decrypt_level, open_pointer, payload_size, read_range, reconstruct, resolve,
};
pub use stream::DataStream;

pub use selfenc_core::TAG_SIZE;

/// Size of a chunk key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;
