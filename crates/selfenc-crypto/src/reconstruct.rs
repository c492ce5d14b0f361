//! Reconstruction: data map + chunk source → original payload
//!
//! Pointer levels are peeled one at a time until a direct map remains. Each
//! level fetches and decrypts all of its chunks in parallel, collects the
//! results in index order and only then looks at them, so the first failure
//! by index wins and a partial payload is never returned.

use bytes::Bytes;
use rayon::prelude::*;
use tracing::{debug, info};

use selfenc_chunks::hash_bytes;
use selfenc_core::{Address, ChunkStore, DataMapConfig, SeResult, SelfEncryptionError, StoreError};

use crate::data_map::{ChunkInfo, DataMap};
use crate::encryptor::decrypt_chunk;
use crate::keys::neighbours;

/// Rebuild the payload described by `map`, fetching chunks through `fetch`.
pub fn reconstruct<F>(map: &DataMap, fetch: F, cfg: &DataMapConfig) -> SeResult<Vec<u8>>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    let direct = resolve(map, &fetch, cfg)?;
    let payload = decrypt_level(&direct, &fetch)?;
    info!(
        bytes = payload.len(),
        chunks = direct.chunks().len(),
        levels = map.level(),
        "reconstructed payload"
    );
    Ok(payload)
}

/// [`reconstruct`] against a [`ChunkStore`].
pub fn decrypt<S: ChunkStore + ?Sized>(
    map: &DataMap,
    store: &S,
    cfg: &DataMapConfig,
) -> SeResult<Vec<u8>> {
    reconstruct(map, |address| store.get(address), cfg)
}

/// Follow pointer levels down to the direct map.
pub fn resolve<F>(map: &DataMap, fetch: &F, cfg: &DataMapConfig) -> SeResult<DataMap>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    if map.level() > cfg.max_depth {
        return Err(SelfEncryptionError::DataMapTooDeep {
            max_depth: cfg.max_depth,
        });
    }
    map.validate()?;

    let mut current = map.clone();
    while let DataMap::Pointer { level, .. } = current {
        let bytes = decrypt_level(&current, fetch)?;
        debug!(level, map_bytes = bytes.len(), "opened pointer level");
        current = open_pointer(&bytes, level)?;
    }
    Ok(current)
}

/// Decode the map one level below a pointer at `parent_level`.
pub fn open_pointer(bytes: &[u8], parent_level: u32) -> SeResult<DataMap> {
    let child = DataMap::deserialize(bytes)?;
    if child.level() + 1 != parent_level {
        return Err(SelfEncryptionError::DataMapDecode(format!(
            "pointer at level {parent_level} decrypts to a map at level {}",
            child.level()
        )));
    }
    Ok(child)
}

/// Fetch, decrypt and concatenate every chunk of one map level.
pub fn decrypt_level<F>(map: &DataMap, fetch: &F) -> SeResult<Vec<u8>>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    map.validate()?;
    let chunks = map.chunks();
    let data_size = map.data_size();

    let results: Vec<SeResult<Vec<u8>>> = chunks
        .par_iter()
        .enumerate()
        .map(|(index, info)| fetch_and_decrypt(info, index, data_size, fetch))
        .collect();
    let plains = results.into_iter().collect::<SeResult<Vec<_>>>()?;

    verify_ring(chunks, &plains)?;

    let payload = plains.concat();
    if payload.len() as u64 != data_size {
        return Err(SelfEncryptionError::DataMapDecode(format!(
            "reconstructed {} bytes, data map records {data_size}",
            payload.len()
        )));
    }
    Ok(payload)
}

pub(crate) fn fetch_and_decrypt<F>(info: &ChunkInfo, index: usize, data_size: u64, fetch: &F) -> SeResult<Vec<u8>>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    let content = fetch(&info.address).map_err(|e| SelfEncryptionError::not_found(info.address, e))?;
    decrypt_chunk(info, index, data_size, &content)
}

/// Check every entry's neighbour references against the decrypted chunks.
fn verify_ring(chunks: &[ChunkInfo], plains: &[Vec<u8>]) -> SeResult<()> {
    let hashes: Vec<Address> = plains.par_iter().map(|p| hash_bytes(p)).collect();
    let count = hashes.len();

    for (index, info) in chunks.iter().enumerate() {
        let [a, b] = neighbours(index, count);
        if info.key_refs != [hashes[a], hashes[b]] {
            return Err(SelfEncryptionError::IntegrityMismatch {
                index,
                address: info.address,
                reason: format!("neighbour references do not match chunks {a} and {b}"),
            });
        }
    }
    Ok(())
}

/// Length of the original payload behind `map`.
///
/// Direct maps answer immediately; pointer maps are resolved first.
pub fn payload_size<F>(map: &DataMap, fetch: F, cfg: &DataMapConfig) -> SeResult<u64>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    Ok(resolve(map, &fetch, cfg)?.data_size())
}

/// Read `len` bytes starting at `start`, decrypting only the chunks that
/// overlap the range. The range is clamped to the payload.
///
/// Chunks outside the range are never fetched, so their neighbour references
/// go unchecked; address and authentication checks still apply to every
/// chunk that is read.
pub fn read_range<F>(
    map: &DataMap,
    fetch: F,
    start: u64,
    len: u64,
    cfg: &DataMapConfig,
) -> SeResult<Vec<u8>>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    let direct = resolve(map, &fetch, cfg)?;
    let data_size = direct.data_size();
    let end = start.saturating_add(len).min(data_size);
    if start >= end {
        return Ok(Vec::new());
    }

    let mut wanted = Vec::new();
    let mut offset = 0u64;
    for (index, info) in direct.chunks().iter().enumerate() {
        let chunk_end = offset + info.raw_size;
        if chunk_end > start && offset < end {
            wanted.push((index, offset, info));
        }
        offset = chunk_end;
    }

    let results: Vec<SeResult<(u64, Vec<u8>)>> = wanted
        .par_iter()
        .map(|&(index, offset, info)| {
            fetch_and_decrypt(info, index, data_size, &fetch).map(|plain| (offset, plain))
        })
        .collect();

    let plains = results.into_iter().collect::<SeResult<Vec<_>>>()?;

    let mut out = Vec::with_capacity(plains.iter().map(|(_, plain)| plain.len()).sum());
    for (offset, plain) in &plains {
        let from = clamp_to_len(start.saturating_sub(*offset), plain.len());
        let to = clamp_to_len(end - offset, plain.len());
        out.extend_from_slice(&plain[from..to]);
    }
    debug!(start, end, chunks = wanted.len(), "read range");
    Ok(out)
}

fn clamp_to_len(n: u64, len: usize) -> usize {
    usize::try_from(n).map_or(len, |n| n.min(len))
}
