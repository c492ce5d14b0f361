//! Chunk-by-chunk reading of a payload
//!
//! [`DataStream`] resolves pointer levels up front, then fetches and decrypts
//! one content chunk per step, in data map order. Only the chunk being
//! yielded is held in memory.
//!
//! Neighbour references are checked as soon as both neighbours of an entry
//! have been read, so a forged entry surfaces at most two chunks late (the
//! last two entries reference chunks 0 and 1 and are checked at the end).

use bytes::Bytes;
use tracing::debug;

use selfenc_chunks::hash_bytes;
use selfenc_core::{Address, DataMapConfig, SeResult, SelfEncryptionError, StoreError};

use crate::data_map::{ChunkInfo, DataMap};
use crate::keys::neighbours;
use crate::reconstruct::{fetch_and_decrypt, read_range, resolve};

/// Sequential reader over the chunks of one payload
pub struct DataStream<F> {
    map: DataMap,
    fetch: F,
    cfg: DataMapConfig,
    next: usize,
    hashes: Vec<Address>,
    verified: usize,
    failed: bool,
}

impl<F> DataStream<F>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    /// Open a stream over the payload behind `map`.
    pub fn new(map: &DataMap, fetch: F, cfg: &DataMapConfig) -> SeResult<Self> {
        let direct = resolve(map, &fetch, cfg)?;
        debug!(
            bytes = direct.data_size(),
            chunks = direct.chunks().len(),
            "opened data stream"
        );
        Ok(Self {
            hashes: Vec::with_capacity(direct.chunks().len()),
            map: direct,
            fetch,
            cfg: cfg.clone(),
            next: 0,
            verified: 0,
            failed: false,
        })
    }

    /// Length of the whole payload.
    pub fn data_size(&self) -> u64 {
        self.map.data_size()
    }

    pub fn chunk_count(&self) -> usize {
        self.map.chunks().len()
    }

    /// Decrypt the next chunk. `Ok(None)` once the payload is exhausted or
    /// after an error has been returned.
    pub fn next_chunk(&mut self) -> SeResult<Option<Vec<u8>>> {
        if self.failed {
            return Ok(None);
        }
        let index = self.next;
        let Some(info) = self.map.chunks().get(index).cloned() else {
            return Ok(None);
        };

        match self.read_chunk(index, &info) {
            Ok(plain) => {
                self.next += 1;
                Ok(Some(plain))
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Read every remaining chunk into one buffer.
    pub fn collect_all(&mut self) -> SeResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Random access into the same payload; does not move the stream.
    pub fn get_range(&self, start: u64, len: u64) -> SeResult<Vec<u8>> {
        read_range(&self.map, &self.fetch, start, len, &self.cfg)
    }

    fn read_chunk(&mut self, index: usize, info: &ChunkInfo) -> SeResult<Vec<u8>> {
        let plain = fetch_and_decrypt(info, index, self.map.data_size(), &self.fetch)?;
        self.hashes.push(hash_bytes(&plain));
        self.check_ring(index)?;
        Ok(plain)
    }

    /// Verify every pending entry whose neighbours are both read by now.
    fn check_ring(&mut self, last_read: usize) -> SeResult<()> {
        let chunks = self.map.chunks();
        let count = chunks.len();

        while self.verified < count {
            let index = self.verified;
            let [a, b] = neighbours(index, count);
            if a > last_read || b > last_read {
                break;
            }
            let info = &chunks[index];
            if info.key_refs != [self.hashes[a], self.hashes[b]] {
                return Err(SelfEncryptionError::IntegrityMismatch {
                    index,
                    address: info.address,
                    reason: format!("neighbour references do not match chunks {a} and {b}"),
                });
            }
            self.verified += 1;
        }
        Ok(())
    }
}

impl<F> Iterator for DataStream<F>
where
    F: Fn(&Address) -> Result<Bytes, StoreError> + Sync,
{
    type Item = SeResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl<F> std::fmt::Debug for DataStream<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("data_size", &self.map.data_size())
            .field("chunks", &self.map.chunks().len())
            .field("next", &self.next)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryptor::encrypt_and_store;
    use selfenc_core::{ChunkStore, MemoryStore, SelfEncConfig};

    fn small_cfg() -> SelfEncConfig {
        let mut cfg = SelfEncConfig::default();
        cfg.chunking.min_chunk_size = 64;
        cfg.chunking.max_raw_chunk_size = 4096;
        cfg.data_map.max_encoded_size = 1024;
        cfg
    }

    fn make_data(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i.wrapping_mul(17) ^ (i >> 4)) as u8).collect()
    }

    #[test]
    fn test_yields_chunks_in_map_order() {
        let cfg = small_cfg();
        let data = make_data(12_000);
        let store = MemoryStore::new();
        let map = encrypt_and_store(&data, &store, &cfg).unwrap();

        let mut stream = DataStream::new(&map, |a| store.get(a), &cfg.data_map).unwrap();
        assert_eq!(stream.data_size(), 12_000);
        assert_eq!(stream.chunk_count(), map.chunks().len());

        let mut offset = 0usize;
        while let Some(chunk) = stream.next_chunk().unwrap() {
            assert_eq!(chunk, &data[offset..offset + chunk.len()]);
            offset += chunk.len();
        }
        assert_eq!(offset, data.len());
        assert!(stream.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_fetches_one_chunk_per_step() {
        let cfg = small_cfg();
        let data = make_data(12_000);
        let store = MemoryStore::new();
        let map = encrypt_and_store(&data, &store, &cfg).unwrap();
        assert_eq!(map.level(), 0);

        let mut stream = DataStream::new(&map, |a| store.get(a), &cfg.data_map).unwrap();
        let before = store.get_count();
        stream.next_chunk().unwrap();
        assert_eq!(store.get_count() - before, 1);
    }

    #[test]
    fn test_collect_all_through_pointer_levels() {
        let cfg = small_cfg();
        let data = make_data(40_000);
        let store = MemoryStore::new();
        let map = encrypt_and_store(&data, &store, &cfg).unwrap();
        assert!(map.is_pointer());

        let mut stream = DataStream::new(&map, |a| store.get(a), &cfg.data_map).unwrap();
        assert_eq!(stream.collect_all().unwrap(), data);
        assert_eq!(stream.get_range(1000, 50).unwrap(), &data[1000..1050]);
    }

    #[test]
    fn test_empty_payload_yields_nothing() {
        let cfg = small_cfg();
        let store = MemoryStore::new();
        let map = encrypt_and_store(b"", &store, &cfg).unwrap();

        let stream = DataStream::new(&map, |a| store.get(a), &cfg.data_map).unwrap();
        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn test_missing_chunk_stops_the_stream() {
        let cfg = small_cfg();
        let data = make_data(12_000);
        let store = MemoryStore::new();
        let map = encrypt_and_store(&data, &store, &cfg).unwrap();
        store.remove(&map.chunks()[1].address);

        let mut stream = DataStream::new(&map, |a| store.get(a), &cfg.data_map).unwrap();
        assert!(stream.next_chunk().unwrap().is_some());
        assert!(matches!(
            stream.next_chunk(),
            Err(SelfEncryptionError::ChunkNotFound { .. })
        ));
        assert!(stream.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_swapped_entries_detected() {
        let cfg = small_cfg();
        let data = make_data(12_000);
        let store = MemoryStore::new();
        let map = encrypt_and_store(&data, &store, &cfg).unwrap();

        let mut chunks = map.chunks().to_vec();
        chunks.swap(0, 1);
        let forged = DataMap::direct(map.data_size(), chunks);

        let stream = DataStream::new(&forged, |a| store.get(a), &cfg.data_map).unwrap();
        let results: Vec<_> = stream.collect();
        assert!(results.iter().any(|r| matches!(
            r,
            Err(SelfEncryptionError::IntegrityMismatch { .. })
        )));
    }
}
