//! Async upload/download of self-encrypted payloads over OpenDAL
//!
//! Encryption and decryption are CPU bound and run on the blocking pool.
//! Downloads fetch every chunk of a map level concurrently, then hand the
//! prefetched set to the codec as its chunk source, one level at a time.
//!
//! Public uploads additionally store the serialized data map as a chunk under
//! its own address, so the payload can later be fetched by address alone.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::future::join_all;
use opendal::{ErrorKind, Operator};
use std::collections::HashMap;
use tracing::{debug, info};

use selfenc_core::{Address, DataMapConfig, SelfEncConfig, SelfEncryptionError, StoreError};
use selfenc_crypto::{
    decrypt_level, encrypt, open_data_map, open_pointer, Chunk, ChunkInfo, DataMapChunk,
};

use crate::operator::chunk_path;

/// Progress callback: (done, total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Result of uploading one payload
#[derive(Debug)]
pub struct UploadResult {
    /// Handle needed to get the payload back
    pub datamap: DataMapChunk,
    pub bytes: u64,
    pub chunks: usize,
    /// Chunks actually written (the rest were already present)
    pub written: usize,
    pub level: u32,
}

/// Result of downloading one payload
#[derive(Debug)]
pub struct DownloadResult {
    pub payload: Vec<u8>,
    pub chunks: usize,
    pub levels: u32,
}

/// Write chunks that are not already present under `prefix`.
///
/// Returns `(written, skipped)`.
pub async fn put_chunks(
    op: &Operator,
    prefix: &str,
    chunks: &[Chunk],
    progress: Option<&ProgressFn>,
) -> Result<(usize, usize)> {
    let total = chunks.len();
    let mut written = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let key = chunk_path(prefix, chunk.address());

        // Dedup by address: identical content always encrypts identically
        if !op.exists(&key).await.unwrap_or(false) {
            op.write(&key, chunk.content().clone())
                .await
                .with_context(|| format!("uploading chunk {i}: {key}"))?;
            written += 1;
        }

        if let Some(cb) = progress {
            cb(
                (i + 1) as u64,
                total as u64,
                &format!("chunk {}/{total}", i + 1),
            );
        }
    }

    Ok((written, total - written))
}

/// Self-encrypt `payload` and store its chunks under `prefix`.
pub async fn upload(
    op: &Operator,
    prefix: &str,
    payload: Bytes,
    cfg: &SelfEncConfig,
    progress: Option<&ProgressFn>,
) -> Result<UploadResult> {
    let bytes = payload.len() as u64;
    let encrypt_cfg = cfg.clone();
    let (chunks, map) = tokio::task::spawn_blocking(move || encrypt(&payload, &encrypt_cfg))
        .await
        .context("encryption task panicked")?
        .context("self-encrypting payload")?;

    let (written, skipped) = put_chunks(op, prefix, &chunks, progress).await?;
    let datamap = DataMapChunk::from_map(&map).context("encoding data map")?;

    info!(
        bytes,
        chunks = chunks.len(),
        written,
        skipped,
        level = map.level(),
        datamap = %datamap.address(),
        "upload complete"
    );

    Ok(UploadResult {
        datamap,
        bytes,
        chunks: chunks.len(),
        written,
        level: map.level(),
    })
}

/// [`upload`], then store the data map itself under
/// `result.datamap.address()`, which becomes the payload's public address.
pub async fn upload_public(
    op: &Operator,
    prefix: &str,
    payload: Bytes,
    cfg: &SelfEncConfig,
    progress: Option<&ProgressFn>,
) -> Result<UploadResult> {
    let result = upload(op, prefix, payload, cfg, progress).await?;
    let address = result.datamap.address();
    let key = chunk_path(prefix, &address);

    if !op.exists(&key).await.unwrap_or(false) {
        op.write(&key, result.datamap.content().clone())
            .await
            .with_context(|| format!("publishing data map: {key}"))?;
    }
    info!(%address, "published data map");
    Ok(result)
}

/// Fetch and decrypt a payload stored with [`upload_public`].
pub async fn download_public(
    op: &Operator,
    prefix: &str,
    address: &Address,
    cfg: &DataMapConfig,
    progress: Option<&ProgressFn>,
) -> Result<DownloadResult> {
    let content = read_chunk(op, prefix, address)
        .await
        .map_err(|e| SelfEncryptionError::not_found(*address, e))?;
    let datamap = open_data_map(address, content)
        .with_context(|| format!("opening public data map {address}"))?;
    download(op, prefix, &datamap, cfg, progress).await
}

/// Fetch and decrypt the payload behind `datamap` from `prefix`.
pub async fn download(
    op: &Operator,
    prefix: &str,
    datamap: &DataMapChunk,
    cfg: &DataMapConfig,
    progress: Option<&ProgressFn>,
) -> Result<DownloadResult> {
    let mut map = datamap.to_map().context("decoding data map")?;
    let levels = map.level();
    if levels > cfg.max_depth {
        return Err(SelfEncryptionError::DataMapTooDeep {
            max_depth: cfg.max_depth,
        }
        .into());
    }

    let mut chunks = 0usize;
    loop {
        let level = map.level();
        let fetched = prefetch(op, prefix, map.chunks()).await;
        chunks += map.chunks().len();
        debug!(level, chunks = fetched.len(), "prefetched level");

        let (map_back, plain) = tokio::task::spawn_blocking(move || {
            let fetch = |address: &Address| {
                fetched
                    .get(address)
                    .cloned()
                    .unwrap_or(Err(StoreError::Missing(*address)))
            };
            let plain = decrypt_level(&map, &fetch);
            (map, plain)
        })
        .await
        .context("decryption task panicked")?;
        let plain = plain.with_context(|| format!("decrypting level {level}"))?;

        if let Some(cb) = progress {
            cb(
                (levels - level + 1) as u64,
                (levels + 1) as u64,
                &format!("level {level}"),
            );
        }

        if !map_back.is_pointer() {
            info!(bytes = plain.len(), chunks, levels, "download complete");
            return Ok(DownloadResult {
                payload: plain,
                chunks,
                levels,
            });
        }
        map = open_pointer(&plain, level).with_context(|| format!("opening level {level}"))?;
    }
}

/// Read all chunks of one level concurrently.
async fn prefetch(
    op: &Operator,
    prefix: &str,
    chunks: &[ChunkInfo],
) -> HashMap<Address, Result<Bytes, StoreError>> {
    let reads = chunks
        .iter()
        .map(|info| async move { (info.address, read_chunk(op, prefix, &info.address).await) });
    join_all(reads).await.into_iter().collect()
}

async fn read_chunk(op: &Operator, prefix: &str, address: &Address) -> Result<Bytes, StoreError> {
    match op.read(&chunk_path(prefix, address)).await {
        Ok(buf) => Ok(buf.to_bytes()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::Missing(*address)),
        Err(e) => Err(StoreError::Backend(e.to_string())),
    }
}
