//! Chunk store contract and an in-memory implementation
//!
//! The codec never owns persisted storage: encrypted chunks are handed to a
//! [`ChunkStore`] keyed by their content address and fetched back from it.
//! Stores are fallible and may be eventually consistent.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::types::Address;

/// Content-addressed chunk persistence.
///
/// Implementations must be `Send + Sync`: reconstruction fetches all chunks
/// of a level concurrently.
pub trait ChunkStore: Send + Sync {
    /// Persist `content` under `address`
    fn put(&self, address: &Address, content: Bytes) -> Result<(), StoreError>;

    /// Fetch the bytes stored under `address`
    fn get(&self, address: &Address) -> Result<Bytes, StoreError>;

    /// Whether a chunk is present (used to skip redundant puts)
    fn contains(&self, address: &Address) -> bool {
        self.get(address).is_ok()
    }
}

/// In-memory chunk store with operation counters.
///
/// Not persistent. Used by tests and by callers that bundle chunks in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chunks: RwLock<HashMap<Address, Bytes>>,
    puts: AtomicU64,
    gets: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `put` calls served
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `get` calls served
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Stored addresses in sorted order
    pub fn addresses(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.chunks.read().keys().copied().collect();
        out.sort();
        out
    }

    /// Drop a chunk, returning whether it was present
    pub fn remove(&self, address: &Address) -> bool {
        self.chunks.write().remove(address).is_some()
    }

    /// Overwrite the bytes under `address` without re-addressing them.
    /// Simulates bit rot or a misbehaving peer.
    pub fn tamper<F: FnOnce(&mut Vec<u8>)>(&self, address: &Address, f: F) -> bool {
        match self.chunks.write().get_mut(address) {
            Some(content) => {
                let mut bytes = content.to_vec();
                f(&mut bytes);
                *content = Bytes::from(bytes);
                true
            }
            None => false,
        }
    }
}

impl ChunkStore for MemoryStore {
    fn put(&self, address: &Address, content: Bytes) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.chunks.write().insert(*address, content);
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<Bytes, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.chunks
            .read()
            .get(address)
            .cloned()
            .ok_or(StoreError::Missing(*address))
    }

    fn contains(&self, address: &Address) -> bool {
        self.chunks.read().contains_key(address)
    }
}
