//! OpenDAL Operator factory for selfenc chunk backends

use anyhow::{Context, Result};
use opendal::Operator;
use std::path::{Path, PathBuf};

use selfenc_core::config::StorageConfig;
use selfenc_core::Address;

/// Credentials for the S3 backend, loaded outside the config file
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Object key of a chunk under `prefix`
pub fn chunk_path(prefix: &str, address: &Address) -> String {
    format!("{}/chunks/{}", prefix.trim_end_matches('/'), address.to_hex())
}

/// Build an operator for the configured backend (`fs`, `memory` or `s3`).
///
/// For `s3`, if `enforce_tls` is true and the endpoint uses HTTP this returns
/// an error. Otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_operator(storage: &StorageConfig, credentials: Option<&S3Credentials>) -> Result<Operator> {
    let op = match storage.backend.as_str() {
        "fs" => {
            let root = expand_home(&storage.root);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {}", root.display()))?
                .finish()
        }
        "memory" => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        "s3" => build_s3(storage, credentials)?,
        other => anyhow::bail!("unknown storage backend '{other}' (expected fs, memory or s3)"),
    };

    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        ))
}

/// Path-style addressing (the opendal 0.55 default) works with SeaweedFS and
/// MinIO as well as AWS.
fn build_s3(storage: &StorageConfig, credentials: Option<&S3Credentials>) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    let creds = credentials.context("s3 backend requires access key credentials")?;
    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    Ok(Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .finish())
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-key".into(),
            secret_access_key: "test-secret".into(),
        }
    }

    #[test]
    fn test_build_memory_operator() {
        let storage = StorageConfig {
            backend: "memory".into(),
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_build_fs_operator() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            backend: "fs".into(),
            root: tmp.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_unknown_backend() {
        let storage = StorageConfig {
            backend: "floppy".into(),
            ..Default::default()
        };
        let err = build_operator(&storage, None).unwrap_err();
        assert!(err.to_string().contains("floppy"));
    }

    #[test]
    fn test_s3_http_warning() {
        // HTTP endpoint with enforce_tls=false should succeed (but log warning)
        let storage = StorageConfig {
            backend: "s3".into(),
            endpoint: "http://localhost:8333".into(),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(build_operator(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_s3_http_enforce_tls() {
        let storage = StorageConfig {
            backend: "s3".into(),
            endpoint: "http://insecure:8333".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let result = build_operator(&storage, Some(&creds()));
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(
            result.unwrap_err().to_string().contains("enforce_tls"),
            "error message should mention enforce_tls"
        );
    }

    #[test]
    fn test_s3_https_requires_credentials() {
        let storage = StorageConfig {
            backend: "s3".into(),
            endpoint: "https://s3.example.com:8333".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_err());
        assert!(build_operator(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_chunk_path() {
        let addr = Address::from_array([0xAB; 32]);
        let path = chunk_path("selfenc/", &addr);
        assert_eq!(path, format!("selfenc/chunks/{}", "ab".repeat(32)));
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let dbg = format!("{:?}", creds());
        assert!(!dbg.contains("test-secret"));
    }
}
