//! Ring key derivation: sibling chunk hashes → per-chunk key + nonce
//!
//! Chunk `i` of `n` is keyed from the pre-encryption hashes of chunks
//! `(i+1) % n` and `(i+2) % n`. The ring is an index lookup over an
//! immutable slice, so no chunk ever references another directly.
//!
//! ```text
//! IKM  = hash[(i+1) % n] || hash[(i+2) % n]
//! salt = "selfenc-ring-v1"
//! info = i (8 bytes BE) || payload length (8 bytes BE)
//! OKM  = HKDF-SHA256(salt, IKM, info) → 32-byte key || 24-byte nonce
//! ```
//!
//! The key is a pure function of content, so identical payloads produce
//! identical ciphertext and therefore identical chunk addresses.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use selfenc_core::{Address, SeResult, SelfEncryptionError};

use crate::{KEY_SIZE, NONCE_SIZE};

const RING_SALT: &[u8] = b"selfenc-ring-v1";

/// Indices of the two chunks whose hashes key chunk `index`.
///
/// Wraps around the ring, so it is well defined for any `count >= 1`.
pub fn neighbours(index: usize, count: usize) -> [usize; 2] {
    [(index + 1) % count, (index + 2) % count]
}

/// Symmetric key material for one chunk. Zeroized on drop.
#[derive(Clone)]
pub struct ChunkKeys {
    key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl ChunkKeys {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }
}

impl Drop for ChunkKeys {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

impl std::fmt::Debug for ChunkKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkKeys")
            .field("key", &"[REDACTED]")
            .field("nonce", &"[REDACTED]")
            .finish()
    }
}

/// Derive the key and nonce for chunk `index` from its neighbours' hashes.
pub fn derive_chunk_keys(
    key_refs: &[Address; 2],
    index: usize,
    data_size: u64,
) -> SeResult<ChunkKeys> {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(key_refs[0].as_bytes());
    ikm[32..].copy_from_slice(key_refs[1].as_bytes());

    let mut info = [0u8; 16];
    info[..8].copy_from_slice(&(index as u64).to_be_bytes());
    info[8..].copy_from_slice(&data_size.to_be_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(RING_SALT), &ikm);
    let mut okm = [0u8; KEY_SIZE + NONCE_SIZE];
    let expanded = hkdf.expand(&info, &mut okm);
    ikm.zeroize();
    expanded.map_err(|e| SelfEncryptionError::Crypto(format!("HKDF expand failed: {e}")))?;

    let mut keys = ChunkKeys {
        key: [0u8; KEY_SIZE],
        nonce: [0u8; NONCE_SIZE],
    };
    keys.key.copy_from_slice(&okm[..KEY_SIZE]);
    keys.nonce.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();

    Ok(keys)
}
