//! selfenc-storage: OpenDAL-backed chunk storage
//!
//! Chunks live at `{prefix}/chunks/{address}`. Private uploads leave the
//! [`selfenc_crypto::DataMapChunk`] with the caller; public uploads also
//! store it there, under its own address.

pub mod health;
pub mod operator;
pub mod transfer;

pub use health::{check_health, is_healthy};
pub use operator::{build_operator, chunk_path, S3Credentials};
pub use transfer::{
    download, download_public, put_chunks, upload, upload_public, DownloadResult, ProgressFn,
    UploadResult,
};
