//! selfenc-chunks: content addressing, payload chunking, and chunk compression
//!
//! # Overview
//! - `address`: deterministic BLAKE3 addressing of slices and files
//! - `chunker`: splits a payload into >= 3 ordered chunks (uniform or FastCDC)
//! - `compress`: per-chunk zstd framing applied before encryption

pub mod address;
pub mod chunker;
pub mod compress;

// Convenience re-exports for the most common operations
pub use address::{hash_bytes, hash_bytes_parallel, hash_file};
pub use chunker::{chunk, chunk_at, uniform_chunk_count, RawChunk};
pub use compress::{pack, unpack};
