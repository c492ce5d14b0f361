//! In-memory bundle of a self-encrypted payload
//!
//! For callers that move the encrypted form around as a unit rather than
//! through a chunk store: the serialized data map plus every chunk it needs.

use std::collections::HashMap;

use bytes::Bytes;

use selfenc_core::{Address, SeResult, SelfEncConfig, StoreError};

use crate::data_map::DataMapChunk;
use crate::encryptor::{encrypt, Chunk};
use crate::reconstruct::reconstruct;

#[derive(Debug, Clone)]
pub struct EncryptedData {
    pub datamap_chunk: DataMapChunk,
    pub content_chunks: Vec<Chunk>,
}

impl EncryptedData {
    /// Total bytes of the encrypted form, data map included
    pub fn size(&self) -> usize {
        self.datamap_chunk.as_bytes().len()
            + self.content_chunks.iter().map(Chunk::size).sum::<usize>()
    }
}

pub fn encrypt_to_bundle(payload: &[u8], cfg: &SelfEncConfig) -> SeResult<EncryptedData> {
    let (content_chunks, map) = encrypt(payload, cfg)?;
    Ok(EncryptedData {
        datamap_chunk: DataMapChunk::from_map(&map)?,
        content_chunks,
    })
}

/// Decrypt a bundle, using its own chunks as the chunk source.
pub fn decrypt_bundle(bundle: &EncryptedData, cfg: &SelfEncConfig) -> SeResult<Vec<u8>> {
    let chunks: HashMap<Address, Bytes> = bundle
        .content_chunks
        .iter()
        .map(|c| (*c.address(), c.content().clone()))
        .collect();

    let map = bundle.datamap_chunk.to_map()?;
    reconstruct(
        &map,
        |address| chunks.get(address).cloned().ok_or(StoreError::Missing(*address)),
        &cfg.data_map,
    )
}
