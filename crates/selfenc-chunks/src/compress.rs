//! Per-chunk zstd framing applied before encryption
//!
//! Frame format (this is the AEAD plaintext, never stored in the clear):
//! ```text
//! [1 byte tag: 0 = raw, 1 = zstd][body]
//! ```
//!
//! A chunk is only stored compressed when that actually shrinks it, so a
//! frame is never larger than `raw + 1` bytes. zstd output is deterministic
//! for a fixed level, which keeps encrypted chunk addresses stable.

use std::io::Read;

use selfenc_core::{SeResult, SelfEncryptionError};

const TAG_RAW: u8 = 0;
const TAG_ZSTD: u8 = 1;

/// Frame `raw` for encryption, compressing at `level` (0 = never compress).
pub fn pack(raw: &[u8], level: i32) -> SeResult<Vec<u8>> {
    if level > 0 && !raw.is_empty() {
        let compressed = zstd::encode_all(raw, level)
            .map_err(|e| SelfEncryptionError::Crypto(format!("zstd compress chunk: {e}")))?;
        if compressed.len() < raw.len() {
            let mut frame = Vec::with_capacity(compressed.len() + 1);
            frame.push(TAG_ZSTD);
            frame.extend_from_slice(&compressed);
            return Ok(frame);
        }
    }

    let mut frame = Vec::with_capacity(raw.len() + 1);
    frame.push(TAG_RAW);
    frame.extend_from_slice(raw);
    Ok(frame)
}

/// Recover the raw chunk bytes from a frame produced by [`pack`].
///
/// Frames whose body holds more than `max_len` bytes are rejected. The
/// decoder stops one byte past the limit, so a hostile frame never expands
/// further than that.
pub fn unpack(frame: &[u8], max_len: u64) -> SeResult<Vec<u8>> {
    let too_long = || SelfEncryptionError::Crypto(format!("chunk frame exceeds {max_len} bytes"));

    match frame.split_first() {
        Some((&TAG_RAW, body)) => {
            if body.len() as u64 > max_len {
                return Err(too_long());
            }
            Ok(body.to_vec())
        }
        Some((&TAG_ZSTD, body)) => {
            let decoder = zstd::stream::read::Decoder::new(body)
                .map_err(|e| SelfEncryptionError::Crypto(format!("zstd decoder: {e}")))?;
            let mut raw = Vec::new();
            decoder
                .take(max_len.saturating_add(1))
                .read_to_end(&mut raw)
                .map_err(|e| SelfEncryptionError::Crypto(format!("zstd decompress chunk: {e}")))?;
            if raw.len() as u64 > max_len {
                return Err(too_long());
            }
            Ok(raw)
        }
        Some((tag, _)) => Err(SelfEncryptionError::Crypto(format!(
            "unknown chunk frame tag {tag}"
        ))),
        None => Err(SelfEncryptionError::Crypto("empty chunk frame".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compressible_data_is_compressed() {
        let data = vec![0x42u8; 64 * 1024];
        let frame = pack(&data, 3).unwrap();
        assert_eq!(frame[0], TAG_ZSTD);
        assert!(frame.len() < data.len() / 10);
        assert_eq!(unpack(&frame, data.len() as u64).unwrap(), data);
    }

    #[test]
    fn incompressible_data_is_stored_raw() {
        let data: Vec<u8> = (0..4096u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 7) as u8)
            .collect();
        let frame = pack(&data, 3).unwrap();
        assert!(frame.len() <= data.len() + 1);
        assert_eq!(unpack(&frame, data.len() as u64).unwrap(), data);
    }

    #[test]
    fn level_zero_disables_compression() {
        let data = vec![0u8; 1024];
        let frame = pack(&data, 0).unwrap();
        assert_eq!(frame[0], TAG_RAW);
        assert_eq!(frame.len(), 1025);
    }

    #[test]
    fn empty_chunk_roundtrip() {
        let frame = pack(b"", 3).unwrap();
        assert_eq!(frame, vec![TAG_RAW]);
        assert!(unpack(&frame, 0).unwrap().is_empty());
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(unpack(&[], 16).is_err());
        assert!(unpack(&[9, 1, 2, 3], 16).is_err());
        assert!(unpack(&[TAG_ZSTD, 0xde, 0xad], 16).is_err());
    }

    #[test]
    fn expansion_is_bounded() {
        let data = vec![0u8; 1024 * 1024];
        let frame = pack(&data, 3).unwrap();
        assert_eq!(frame[0], TAG_ZSTD);
        assert!(unpack(&frame, 4096).is_err());
        assert!(unpack(&frame, data.len() as u64 - 1).is_err());
        assert_eq!(unpack(&frame, data.len() as u64).unwrap(), data);

        let raw = pack(b"plain", 0).unwrap();
        assert!(unpack(&raw, 4).is_err());
    }

    #[test]
    fn packing_is_deterministic() {
        let data: Vec<u8> = (0u8..=255).cycle().take(100_000).collect();
        assert_eq!(pack(&data, 3).unwrap(), pack(&data, 3).unwrap());
    }

    proptest! {
        #[test]
        fn pack_unpack_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..=16384),
            level in 0i32..=5,
        ) {
            let frame = pack(&data, level).unwrap();
            prop_assert!(frame.len() <= data.len() + 1);
            prop_assert_eq!(unpack(&frame, data.len() as u64).unwrap(), data);
        }
    }
}
