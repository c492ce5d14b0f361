//! BLAKE3 content addressing for byte slices and files
//!
//! The address of a blob is a pure function of its bytes: no salt, no
//! randomness, no external state. Identical content always lands on the
//! same address, which is what makes stored chunks deduplicate.

use anyhow::{Context, Result};
use std::path::Path;

use selfenc_core::Address;

/// Address a byte slice in memory. Total over any length, including empty.
pub fn hash_bytes(data: &[u8]) -> Address {
    Address::from(blake3::hash(data))
}

/// Address a large in-memory buffer using BLAKE3's rayon tree hashing.
///
/// Produces exactly the same digest as [`hash_bytes`].
pub fn hash_bytes_parallel(data: &[u8]) -> Address {
    let mut hasher = blake3::Hasher::new();
    hasher.update_rayon(data);
    Address::from(hasher.finalize())
}

/// Address a file using the streaming interface (for files too large to read fully)
pub fn hash_file(path: &Path) -> Result<Address> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening file for streaming hash: {}", path.display()))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).with_context(|| "reading for hash")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Address::from(hasher.finalize()))
}
