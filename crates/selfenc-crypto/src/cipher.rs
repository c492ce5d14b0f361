//! Per-chunk XChaCha20-Poly1305 sealing with ring-derived keys
//!
//! Encrypted chunk format (binary):
//! ```text
//! [N bytes: ciphertext of the chunk frame][16 bytes: Poly1305 tag]
//! AAD = chunk_index (8 bytes, big-endian) || payload length (8 bytes, big-endian)
//! ```
//!
//! The nonce is derived alongside the key and never stored. Every key is
//! bound to the exact content of two sibling chunks, so a (key, nonce) pair
//! is never reused for different plaintext.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use selfenc_core::{SeResult, SelfEncryptionError};

use crate::keys::ChunkKeys;
use crate::TAG_SIZE;

/// Encrypt a chunk frame. Returns `[ciphertext][16-byte tag]`.
pub fn seal(keys: &ChunkKeys, index: usize, data_size: u64, frame: &[u8]) -> SeResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(keys.key().into());
    let nonce = XNonce::from_slice(keys.nonce());
    let aad = build_aad(index, data_size);

    cipher
        .encrypt(
            nonce,
            Payload {
                msg: frame,
                aad: &aad,
            },
        )
        .map_err(|e| SelfEncryptionError::Crypto(format!("chunk encryption failed: {e}")))
}

/// Decrypt a sealed chunk.
///
/// Returns `None` when authentication fails: the keys, index or payload
/// length do not match what the chunk was sealed with.
pub fn open(keys: &ChunkKeys, index: usize, data_size: u64, sealed: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < TAG_SIZE {
        return None;
    }

    let cipher = XChaCha20Poly1305::new(keys.key().into());
    let nonce = XNonce::from_slice(keys.nonce());
    let aad = build_aad(index, data_size);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: sealed,
                aad: &aad,
            },
        )
        .ok()
}

/// Build AAD: chunk_index (8 bytes BE) || data_size (8 bytes BE)
fn build_aad(index: usize, data_size: u64) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&(index as u64).to_be_bytes());
    aad[8..].copy_from_slice(&data_size.to_be_bytes());
    aad
}
