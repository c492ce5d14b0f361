//! Self-encryption of a payload into content-addressed chunks
//!
//! Once chunk boundaries are fixed, every chunk is framed, keyed from its
//! ring neighbours and sealed independently, so the work fans out over rayon.
//! Results are collected back into index order before anything is returned.

use bytes::Bytes;
use rayon::prelude::*;
use tracing::{debug, info};

use selfenc_chunks::{hash_bytes, pack, unpack, RawChunk};
use selfenc_core::{
    Address, ChunkStore, ChunkStrategy, ChunkingConfig, SeResult, SelfEncConfig,
    SelfEncryptionError,
};

use crate::cipher::{open, seal};
use crate::data_map::{ChunkInfo, DataMap};
use crate::keys::{derive_chunk_keys, neighbours};

/// An encrypted chunk as handed to a store
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    content: Bytes,
}

impl Chunk {
    /// Wrap stored bytes, addressing them by their BLAKE3 hash.
    pub fn new(content: Bytes) -> Self {
        Self {
            address: hash_bytes(&content),
            content,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn is_too_big(&self, cfg: &ChunkingConfig) -> bool {
        self.size() > cfg.chunk_max_size()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("size", &self.content.len())
            .finish()
    }
}

/// Self-encrypt `payload`.
///
/// Returns every chunk to store (content chunks first, then the chunks of
/// each pointer level) and the top-level data map.
pub fn encrypt(payload: &[u8], cfg: &SelfEncConfig) -> SeResult<(Vec<Chunk>, DataMap)> {
    cfg.validate()?;

    let raw = selfenc_chunks::chunk(payload, &cfg.chunking)?;
    let (mut chunks, infos) = encrypt_chunks(payload, &raw, &cfg.chunking)?;
    let map = shrink(DataMap::direct(payload.len() as u64, infos), cfg, &mut chunks)?;

    info!(
        bytes = payload.len(),
        chunks = chunks.len(),
        level = map.level(),
        "encrypted payload"
    );
    Ok((chunks, map))
}

/// Encrypt a payload that has already been split.
///
/// `raw` must cover `payload` contiguously in index order, and each chunk's
/// hash must match its bytes.
pub fn encrypt_chunks(
    payload: &[u8],
    raw: &[RawChunk],
    cfg: &ChunkingConfig,
) -> SeResult<(Vec<Chunk>, Vec<ChunkInfo>)> {
    check_split(payload, raw, cfg)?;

    let count = raw.len();
    let data_size = payload.len() as u64;
    let max = cfg.chunk_max_size();

    let results: Vec<SeResult<(Chunk, ChunkInfo)>> = raw
        .par_iter()
        .map(|rc| {
            let bytes = &payload[rc.range()];
            if hash_bytes(bytes) != rc.hash {
                return Err(SelfEncryptionError::InvalidBoundaries(format!(
                    "chunk {} hash does not match its bytes",
                    rc.index
                )));
            }

            let [a, b] = neighbours(rc.index, count);
            let key_refs = [raw[a].hash, raw[b].hash];
            let keys = derive_chunk_keys(&key_refs, rc.index, data_size)?;

            let frame = pack(bytes, cfg.compression_level)?;
            let chunk = Chunk::new(Bytes::from(seal(&keys, rc.index, data_size, &frame)?));
            if chunk.size() > max {
                return Err(SelfEncryptionError::ChunkTooBig {
                    index: rc.index,
                    size: chunk.size(),
                    max,
                });
            }

            let info = ChunkInfo {
                address: chunk.address,
                raw_size: rc.length as u64,
                key_refs,
            };
            Ok((chunk, info))
        })
        .collect();

    let mut chunks = Vec::with_capacity(count);
    let mut infos = Vec::with_capacity(count);
    for result in results {
        let (chunk, info) = result?;
        chunks.push(chunk);
        infos.push(info);
    }
    Ok((chunks, infos))
}

fn check_split(payload: &[u8], raw: &[RawChunk], cfg: &ChunkingConfig) -> SeResult<()> {
    let mut offset = 0usize;
    for (i, rc) in raw.iter().enumerate() {
        if rc.index != i || rc.offset != offset || rc.length == 0 {
            return Err(SelfEncryptionError::InvalidBoundaries(format!(
                "chunk {i} is not contiguous (index {}, offset {}, length {}, expected offset {offset})",
                rc.index, rc.offset, rc.length
            )));
        }
        if rc.length > cfg.max_raw_chunk_size {
            return Err(SelfEncryptionError::ChunkTooBig {
                index: i,
                size: rc.length,
                max: cfg.max_raw_chunk_size,
            });
        }
        offset += rc.length;
    }
    if offset != payload.len() {
        return Err(SelfEncryptionError::InvalidBoundaries(format!(
            "chunks cover {offset} of {} payload bytes",
            payload.len()
        )));
    }
    Ok(())
}

/// Self-encrypt the serialized map until it fits `data_map.max_encoded_size`.
///
/// Chunks of every new level are appended to `chunks`.
pub fn shrink(mut map: DataMap, cfg: &SelfEncConfig, chunks: &mut Vec<Chunk>) -> SeResult<DataMap> {
    // Map bytes always use the uniform split so pointer levels stay reproducible
    let chunking = ChunkingConfig {
        strategy: ChunkStrategy::Uniform,
        allow_small: true,
        ..cfg.chunking.clone()
    };

    loop {
        let bytes = map.serialize()?;
        if bytes.len() <= cfg.data_map.max_encoded_size {
            return Ok(map);
        }

        let level = map.level() + 1;
        if level > cfg.data_map.max_depth {
            return Err(SelfEncryptionError::DataMapTooDeep {
                max_depth: cfg.data_map.max_depth,
            });
        }

        let raw = selfenc_chunks::chunk(&bytes, &chunking)?;
        let (level_chunks, infos) = encrypt_chunks(&bytes, &raw, &chunking)?;
        debug!(level, map_bytes = bytes.len(), chunks = infos.len(), "shrinking data map");

        chunks.extend(level_chunks);
        map = DataMap::Pointer {
            level,
            data_size: bytes.len() as u64,
            chunks: infos,
        };
    }
}

/// Verify and decrypt one stored chunk.
///
/// `index` and `data_size` are the chunk's position and the length of the
/// level it belongs to.
pub fn decrypt_chunk(
    info: &ChunkInfo,
    index: usize,
    data_size: u64,
    content: &[u8],
) -> SeResult<Vec<u8>> {
    let actual = hash_bytes(content);
    if actual != info.address {
        return Err(SelfEncryptionError::ChunkCorrupted {
            expected: info.address,
            actual,
        });
    }

    let mismatch = |reason: String| SelfEncryptionError::IntegrityMismatch {
        index,
        address: info.address,
        reason,
    };

    let keys = derive_chunk_keys(&info.key_refs, index, data_size)?;
    let frame = open(&keys, index, data_size, content)
        .ok_or_else(|| mismatch("authentication failed".into()))?;
    let raw = unpack(&frame, info.raw_size).map_err(|e| mismatch(e.to_string()))?;

    if raw.len() as u64 != info.raw_size {
        return Err(mismatch(format!(
            "decrypted {} bytes, data map records {}",
            raw.len(),
            info.raw_size
        )));
    }
    Ok(raw)
}

/// Put chunks that the store does not hold yet. Returns how many were written.
pub fn store_chunks<S: ChunkStore + ?Sized>(store: &S, chunks: &[Chunk]) -> SeResult<usize> {
    let mut written = 0usize;
    for chunk in chunks {
        if store.contains(&chunk.address) {
            debug!(address = %chunk.address, "chunk already stored, skipping");
            continue;
        }
        store
            .put(&chunk.address, chunk.content.clone())
            .map_err(|source| SelfEncryptionError::Store {
                address: chunk.address,
                source,
            })?;
        written += 1;
    }
    debug!(written, skipped = chunks.len() - written, "stored chunks");
    Ok(written)
}

/// Encrypt `payload` and put its chunks into `store`.
pub fn encrypt_and_store<S: ChunkStore + ?Sized>(
    payload: &[u8],
    store: &S,
    cfg: &SelfEncConfig,
) -> SeResult<DataMap> {
    let (chunks, map) = encrypt(payload, cfg)?;
    store_chunks(store, &chunks)?;
    Ok(map)
}
