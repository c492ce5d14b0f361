//! Payload chunking ahead of self-encryption
//!
//! Self-encryption needs at least three chunks so every chunk has two
//! distinct neighbours to derive its key from. Two strategies are offered:
//!
//!   - Uniform (default): N = max(3, ceil(len / max_raw)) near-equal chunks.
//!     The `len % N` leftover bytes go one each to the trailing chunks, so no
//!     two chunks differ by more than a byte.
//!   - Content-defined: FastCDC boundaries, falling back to uniform whenever
//!     FastCDC yields fewer than three chunks. A FastCDC tail shorter than
//!     the minimum is folded into its predecessor.
//!
//! Payloads shorter than `3 * min_chunk_size` are split into `min(3, len)`
//! near-equal chunks (so empty payloads produce no chunks at all), unless the
//! config forbids small payloads, in which case they are rejected.
//!
//! Each chunk carries the BLAKE3 address of its raw bytes. Hashing runs in
//! parallel once the boundaries are fixed.

use rayon::prelude::*;
use std::ops::Range;
use tracing::debug;

use selfenc_core::{Address, ChunkStrategy, ChunkingConfig, SeResult, SelfEncryptionError};

use crate::address::hash_bytes;

/// A pre-encryption chunk: a span of the payload plus its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Position in the ordered chunk sequence
    pub index: usize,
    /// Byte offset within the payload
    pub offset: usize,
    /// Chunk length in bytes
    pub length: usize,
    /// BLAKE3 address of the raw chunk bytes
    pub hash: Address,
}

impl RawChunk {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// Split `payload` into ordered chunks according to `cfg`.
pub fn chunk(payload: &[u8], cfg: &ChunkingConfig) -> SeResult<Vec<RawChunk>> {
    cfg.validate()?;
    let len = payload.len();

    if len < cfg.min_encryptable_bytes() {
        if !cfg.allow_small {
            return Err(SelfEncryptionError::PayloadTooSmall {
                size: len,
                min: cfg.min_encryptable_bytes(),
            });
        }
        let spans = even_spans(len, len.min(3));
        debug!(len, chunks = spans.len(), "small payload: degenerate split");
        return Ok(hash_spans(payload, spans));
    }

    let spans = match cfg.strategy {
        ChunkStrategy::Uniform => uniform_spans(len, cfg.max_raw_chunk_size),
        ChunkStrategy::ContentDefined => {
            let mut spans = cdc_spans(payload, cfg);
            absorb_short_tail(&mut spans, cfg.min_chunk_size, cfg.max_raw_chunk_size);
            if spans.len() < 3 {
                debug!(len, cdc_chunks = spans.len(), "fastcdc yielded < 3 chunks, using uniform split");
                uniform_spans(len, cfg.max_raw_chunk_size)
            } else {
                spans
            }
        }
    };

    debug!(len, chunks = spans.len(), strategy = ?cfg.strategy, "chunked payload");
    Ok(hash_spans(payload, spans))
}

/// Split `payload` at caller-chosen cut points.
///
/// `boundaries` are interior offsets, strictly increasing and strictly inside
/// `(0, payload.len())`. Any resulting chunk larger than the configured raw
/// maximum fails with `ChunkTooBig`.
pub fn chunk_at(
    payload: &[u8],
    boundaries: &[usize],
    cfg: &ChunkingConfig,
) -> SeResult<Vec<RawChunk>> {
    cfg.validate()?;
    let len = payload.len();
    if len == 0 {
        if !boundaries.is_empty() {
            return Err(SelfEncryptionError::InvalidBoundaries(
                "empty payload cannot have cut points".into(),
            ));
        }
        return Ok(vec![]);
    }

    let mut spans = Vec::with_capacity(boundaries.len() + 1);
    let mut start = 0usize;
    for &cut in boundaries.iter().chain(std::iter::once(&len)) {
        if cut <= start || cut > len {
            return Err(SelfEncryptionError::InvalidBoundaries(format!(
                "cut point {cut} out of order or out of range (previous {start}, payload {len})"
            )));
        }
        spans.push((start, cut - start));
        start = cut;
    }

    if let Some((index, &(_, size))) = spans
        .iter()
        .enumerate()
        .find(|(_, (_, size))| *size > cfg.max_raw_chunk_size)
    {
        return Err(SelfEncryptionError::ChunkTooBig {
            index,
            size,
            max: cfg.max_raw_chunk_size,
        });
    }

    Ok(hash_spans(payload, spans))
}

/// Number of uniform chunks for a payload of `len` bytes.
///
/// The largest chunk is `ceil(len / N)`, which never exceeds `max`.
pub fn uniform_chunk_count(len: usize, max: usize) -> usize {
    len.div_ceil(max.max(1)).max(3)
}

fn uniform_spans(len: usize, max: usize) -> Vec<(usize, usize)> {
    even_spans(len, uniform_chunk_count(len, max))
}

fn even_spans(len: usize, n: usize) -> Vec<(usize, usize)> {
    if n == 0 {
        return vec![];
    }
    let base = len / n;
    let longer_from = n - len % n;
    let mut offset = 0usize;
    (0..n)
        .map(|i| {
            let length = base + usize::from(i >= longer_from);
            let span = (offset, length);
            offset += length;
            span
        })
        .collect()
}

/// Fold a final span shorter than `min` into the one before it. If the pair
/// would then exceed `max`, it is split evenly instead; both halves land in
/// `[min, max]` because `max >= 2 * min`.
fn absorb_short_tail(spans: &mut Vec<(usize, usize)>, min: usize, max: usize) {
    let n = spans.len();
    if n < 2 || spans[n - 1].1 >= min {
        return;
    }
    let (offset, prev) = spans[n - 2];
    let joined = prev + spans[n - 1].1;
    if joined <= max {
        spans.pop();
        spans[n - 2] = (offset, joined);
    } else {
        let head = joined / 2;
        spans[n - 2] = (offset, head);
        spans[n - 1] = (offset + head, joined - head);
    }
}

fn cdc_spans(payload: &[u8], cfg: &ChunkingConfig) -> Vec<(usize, usize)> {
    let min = cfg.min_chunk_size as u32;
    let max = cfg.max_raw_chunk_size as u32;
    let avg = ((min + max) / 2).clamp(256, 4 * 1024 * 1024);

    fastcdc::v2020::FastCDC::new(payload, min, avg, max)
        .map(|c| (c.offset, c.length))
        .collect()
}

fn hash_spans(payload: &[u8], spans: Vec<(usize, usize)>) -> Vec<RawChunk> {
    spans
        .into_par_iter()
        .enumerate()
        .map(|(index, (offset, length))| RawChunk {
            index,
            offset,
            length,
            hash: hash_bytes(&payload[offset..offset + length]),
        })
        .collect()
}
