//! Integration tests for the async upload/download pipeline.
//!
//! Payloads are self-encrypted, written to an OpenDAL backend, and read back
//! through the data map handle alone.

use bytes::Bytes;
use opendal::Operator;
use tempfile::TempDir;

use selfenc_core::config::StorageConfig;
use selfenc_core::{Address, SelfEncConfig, SelfEncryptionError};
use selfenc_crypto::DataMapChunk;
use selfenc_storage::{
    build_operator, chunk_path, check_health, download, download_public, upload, upload_public,
};

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn small_config() -> SelfEncConfig {
    let mut cfg = SelfEncConfig::default();
    cfg.chunking.min_chunk_size = 64;
    cfg.chunking.max_raw_chunk_size = 4096;
    cfg.data_map.max_encoded_size = 1024;
    cfg
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 7) as u8)
        .collect()
}

#[tokio::test]
async fn upload_download_roundtrip() {
    let op = memory_operator();
    let cfg = small_config();
    let original = b"hello self-encrypted world! this payload will be chunked, encrypted, \
                     uploaded, downloaded, decrypted, and verified for integrity.";

    let up = upload(&op, "test/roundtrip", Bytes::from_static(original), &cfg, None)
        .await
        .expect("upload should succeed");
    assert_eq!(up.bytes, original.len() as u64);
    assert_eq!(up.chunks, 3);
    assert_eq!(up.written, 3);

    let down = download(&op, "test/roundtrip", &up.datamap, &cfg.data_map, None)
        .await
        .expect("download should succeed");
    assert_eq!(down.payload, original);
    assert_eq!(down.levels, 0);
}

#[tokio::test]
async fn multi_level_roundtrip_through_hex_handle() {
    let op = memory_operator();
    let cfg = small_config();
    let data = make_data(400 * 1024);

    let up = upload(&op, "test/levels", Bytes::from(data.clone()), &cfg, None)
        .await
        .unwrap();
    assert!(up.level >= 2, "got level {}", up.level);

    let handle = DataMapChunk::from_hex(&up.datamap.to_hex()).unwrap();
    let down = download(&op, "test/levels", &handle, &cfg.data_map, None)
        .await
        .unwrap();
    assert_eq!(down.levels, up.level);
    assert_eq!(down.payload, data);
}

#[tokio::test]
async fn second_upload_writes_nothing() {
    let op = memory_operator();
    let cfg = small_config();
    let data = Bytes::from(make_data(20_000));

    let first = upload(&op, "test/dedup", data.clone(), &cfg, None).await.unwrap();
    let second = upload(&op, "test/dedup", data, &cfg, None).await.unwrap();

    assert_eq!(first.written, first.chunks);
    assert_eq!(second.written, 0);
    assert_eq!(first.datamap, second.datamap);
}

#[tokio::test]
async fn progress_reports_every_chunk() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    let op = memory_operator();
    let cfg = small_config();
    let calls = Arc::new(AtomicU64::new(0));
    let seen = calls.clone();
    let progress: selfenc_storage::ProgressFn = Box::new(move |_, _, _| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let up = upload(&op, "test/progress", Bytes::from(make_data(10_000)), &cfg, Some(&progress))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), up.chunks as u64);
}

#[tokio::test]
async fn fs_backend_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let storage = StorageConfig {
        backend: "fs".into(),
        root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let op = build_operator(&storage, None).unwrap();
    check_health(&op).await.unwrap();

    let cfg = small_config();
    let data = make_data(12_345);
    let up = upload(&op, &storage.prefix, Bytes::from(data.clone()), &cfg, None)
        .await
        .unwrap();

    let on_disk = std::fs::read_dir(tmp.path().join(&storage.prefix).join("chunks"))
        .unwrap()
        .count();
    assert_eq!(on_disk, up.chunks);

    let down = download(&op, &storage.prefix, &up.datamap, &cfg.data_map, None)
        .await
        .unwrap();
    assert_eq!(down.payload, data);
}

#[tokio::test]
async fn public_payload_by_address_on_fs() {
    let tmp = TempDir::new().unwrap();
    let storage = StorageConfig {
        backend: "fs".into(),
        root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let op = build_operator(&storage, None).unwrap();
    let cfg = small_config();
    let data = make_data(64 * 1024);

    let up = upload_public(&op, &storage.prefix, Bytes::from(data.clone()), &cfg, None)
        .await
        .unwrap();
    let on_disk = std::fs::read_dir(tmp.path().join(&storage.prefix).join("chunks"))
        .unwrap()
        .count();
    assert_eq!(on_disk, up.chunks + 1, "content chunks plus the data map");

    let address = Address::from_hex(&up.datamap.address().to_hex()).unwrap();
    let down = download_public(&op, &storage.prefix, &address, &cfg.data_map, None)
        .await
        .unwrap();
    assert_eq!(down.payload, data);
}

#[tokio::test]
async fn tampered_public_data_map_is_rejected() {
    let op = memory_operator();
    let cfg = small_config();
    let up = upload_public(&op, "test/public", Bytes::from(make_data(3000)), &cfg, None)
        .await
        .unwrap();
    let address = up.datamap.address();

    let mut forged = up.datamap.as_bytes().to_vec();
    forged.push(b'\n');
    op.write(&chunk_path("test/public", &address), forged)
        .await
        .unwrap();

    let err = download_public(&op, "test/public", &address, &cfg.data_map, None)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err.downcast_ref::<SelfEncryptionError>(),
            Some(SelfEncryptionError::ChunkCorrupted { .. })
        ),
        "got {err:?}"
    );
}
