//! Public payloads: the data map is stored as one more chunk
//!
//! A private upload hands its [`DataMapChunk`] back to the caller and nothing
//! else can recover the payload. A public upload also puts the serialized map
//! under its own BLAKE3 address, so that address alone is enough to get the
//! payload back. Anyone who learns the address can read the data.

use bytes::Bytes;
use tracing::debug;

use selfenc_chunks::hash_bytes;
use selfenc_core::{
    Address, ChunkStore, DataMapConfig, SeResult, SelfEncConfig, SelfEncryptionError, StoreError,
};

use crate::data_map::DataMapChunk;
use crate::encryptor::encrypt_and_store;
use crate::reconstruct::decrypt;

/// Put `datamap` into `store` under its own address, unless already present.
pub fn store_data_map<S: ChunkStore + ?Sized>(
    store: &S,
    datamap: &DataMapChunk,
) -> SeResult<Address> {
    let address = datamap.address();
    if store.contains(&address) {
        debug!(%address, "data map already stored");
        return Ok(address);
    }
    store
        .put(&address, datamap.content().clone())
        .map_err(|source| SelfEncryptionError::Store { address, source })?;
    Ok(address)
}

/// Check fetched bytes against the public address and decode them.
pub fn open_data_map(address: &Address, content: Bytes) -> SeResult<DataMapChunk> {
    let actual = hash_bytes(&content);
    if actual != *address {
        return Err(SelfEncryptionError::ChunkCorrupted {
            expected: *address,
            actual,
        });
    }
    DataMapChunk::from_bytes(content)
}

/// Fetch the data map published at `address`.
pub fn fetch_data_map<F>(address: &Address, fetch: F) -> SeResult<DataMapChunk>
where
    F: Fn(&Address) -> Result<Bytes, StoreError>,
{
    let content = fetch(address).map_err(|e| SelfEncryptionError::not_found(*address, e))?;
    open_data_map(address, content)
}

/// Self-encrypt `payload`, store every chunk and the data map itself.
///
/// Returns the address the payload can be read back from.
pub fn encrypt_public<S: ChunkStore + ?Sized>(
    payload: &[u8],
    store: &S,
    cfg: &SelfEncConfig,
) -> SeResult<Address> {
    let map = encrypt_and_store(payload, store, cfg)?;
    store_data_map(store, &DataMapChunk::from_map(&map)?)
}

/// Read back a payload stored with [`encrypt_public`].
pub fn decrypt_public<S: ChunkStore + ?Sized>(
    address: &Address,
    store: &S,
    cfg: &DataMapConfig,
) -> SeResult<Vec<u8>> {
    let datamap = fetch_data_map(address, |a| store.get(a))?;
    decrypt(&datamap.to_map()?, store, cfg)
}
