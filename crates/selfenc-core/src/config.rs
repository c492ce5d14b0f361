use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{SeResult, SelfEncryptionError};
use crate::CHUNK_OVERHEAD;

/// Top-level configuration (loaded from selfenc.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfEncConfig {
    pub chunking: ChunkingConfig,
    pub data_map: DataMapConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl SelfEncConfig {
    pub fn validate(&self) -> SeResult<()> {
        self.chunking.validate()?;
        self.data_map.validate()?;
        // A map entry serializes to ~240 bytes; chunks at least as large as the
        // threshold make every pointer level strictly smaller than the last
        if self.chunking.max_raw_chunk_size < self.data_map.max_encoded_size {
            return Err(SelfEncryptionError::Config(format!(
                "chunking.max_raw_chunk_size ({}) must be at least data_map.max_encoded_size ({})",
                self.chunking.max_raw_chunk_size, self.data_map.max_encoded_size
            )));
        }
        Ok(())
    }
}

/// How a payload is split into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Near-equal chunks, differing by at most one byte
    #[default]
    Uniform,
    /// FastCDC boundaries between min and max chunk size
    ContentDefined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Smallest chunk the uniform splitter produces (default: 1 MiB)
    pub min_chunk_size: usize,
    /// Largest raw (pre-encryption) chunk (default: 4 MiB)
    pub max_raw_chunk_size: usize,
    pub strategy: ChunkStrategy,
    /// zstd level applied to each chunk before encryption, 0 disables (default: 3)
    pub compression_level: i32,
    /// Encode payloads below 3 * min_chunk_size as 1-3 small chunks instead
    /// of rejecting them (default: true)
    pub allow_small: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 1024 * 1024,
            max_raw_chunk_size: 4 * 1024 * 1024,
            strategy: ChunkStrategy::Uniform,
            compression_level: 3,
            allow_small: true,
        }
    }
}

impl ChunkingConfig {
    /// Payloads at least this long get the regular (non-degenerate) split
    pub fn min_encryptable_bytes(&self) -> usize {
        3 * self.min_chunk_size
    }

    /// Maximum size of an encrypted chunk as stored
    pub fn chunk_max_size(&self) -> usize {
        self.max_raw_chunk_size + CHUNK_OVERHEAD
    }

    pub fn validate(&self) -> SeResult<()> {
        if self.min_chunk_size == 0 {
            return Err(SelfEncryptionError::Config(
                "chunking.min_chunk_size must be > 0".into(),
            ));
        }
        // Guarantees every uniform chunk of a payload >= 3 * min stays >= min
        if self.max_raw_chunk_size < 2 * self.min_chunk_size {
            return Err(SelfEncryptionError::Config(format!(
                "chunking.max_raw_chunk_size ({}) must be at least twice min_chunk_size ({})",
                self.max_raw_chunk_size, self.min_chunk_size
            )));
        }
        if !(0..=22).contains(&self.compression_level) {
            return Err(SelfEncryptionError::Config(format!(
                "chunking.compression_level must be within 0..=22, got {}",
                self.compression_level
            )));
        }
        if self.strategy == ChunkStrategy::ContentDefined {
            // fastcdc v2020 asserts on these bounds
            if !(64..=1024 * 1024).contains(&self.min_chunk_size) {
                return Err(SelfEncryptionError::Config(format!(
                    "content_defined needs min_chunk_size within 64..=1048576, got {}",
                    self.min_chunk_size
                )));
            }
            if !(1024..=16 * 1024 * 1024).contains(&self.max_raw_chunk_size) {
                return Err(SelfEncryptionError::Config(format!(
                    "content_defined needs max_raw_chunk_size within 1024..=16777216, got {}",
                    self.max_raw_chunk_size
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMapConfig {
    /// Serialized maps above this size are wrapped in another level (default: 4 KiB)
    pub max_encoded_size: usize,
    /// Maximum number of pointer levels (default: 8)
    pub max_depth: u32,
}

impl Default for DataMapConfig {
    fn default() -> Self {
        Self {
            max_encoded_size: 4 * 1024,
            max_depth: 8,
        }
    }
}

impl DataMapConfig {
    pub fn validate(&self) -> SeResult<()> {
        if self.max_encoded_size < 1024 {
            return Err(SelfEncryptionError::Config(format!(
                "data_map.max_encoded_size must be at least 1024 bytes, got {}",
                self.max_encoded_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "fs", "memory" or "s3"
    pub backend: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Key prefix for chunk objects
    pub prefix: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// S3 bucket
    pub bucket: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/selfenc/chunks"),
            prefix: "selfenc".into(),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "selfenc".into(),
            enforce_tls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[chunking]
min_chunk_size = 65536
max_raw_chunk_size = 262144
strategy = "content_defined"
compression_level = 0
allow_small = false

[data_map]
max_encoded_size = 8192
max_depth = 4

[storage]
backend = "s3"
endpoint = "https://s3.example.com:8333"
bucket = "chunks"
enforce_tls = true

[log]
level = "debug"
format = "json"
"#;
        let config: SelfEncConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.chunking.min_chunk_size, 65536);
        assert_eq!(config.chunking.strategy, ChunkStrategy::ContentDefined);
        assert_eq!(config.chunking.compression_level, 0);
        assert!(!config.chunking.allow_small);
        assert_eq!(config.data_map.max_depth, 4);
        assert_eq!(config.storage.backend, "s3");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.log.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: SelfEncConfig = toml::from_str("").unwrap();

        assert_eq!(config.chunking.min_chunk_size, 1024 * 1024);
        assert_eq!(config.chunking.max_raw_chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.chunking.strategy, ChunkStrategy::Uniform);
        assert!(config.chunking.allow_small);
        assert_eq!(config.data_map.max_encoded_size, 4096);
        assert_eq!(config.data_map.max_depth, 8);
        assert_eq!(config.storage.backend, "fs");
        assert_eq!(config.log.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_chunk_max_size_includes_overhead() {
        let c = ChunkingConfig::default();
        assert_eq!(c.chunk_max_size(), 4 * 1024 * 1024 + 17);
        assert_eq!(c.min_encryptable_bytes(), 3 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_narrow_range() {
        let c = ChunkingConfig {
            min_chunk_size: 1000,
            max_raw_chunk_size: 1500,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(SelfEncryptionError::Config(_))));
    }

    #[test]
    fn test_validate_content_defined_bounds() {
        let c = ChunkingConfig {
            min_chunk_size: 16,
            max_raw_chunk_size: 4096,
            strategy: ChunkStrategy::ContentDefined,
            ..Default::default()
        };
        assert!(c.validate().is_err(), "fastcdc min below 64 must be rejected");
    }

    #[test]
    fn test_validate_tiny_data_map_threshold() {
        let d = DataMapConfig {
            max_encoded_size: 100,
            max_depth: 8,
        };
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_validate_chunks_smaller_than_map_threshold() {
        let mut config = SelfEncConfig::default();
        config.chunking.min_chunk_size = 64;
        config.chunking.max_raw_chunk_size = 128;
        config.data_map.max_encoded_size = 1024;
        config.chunking.validate().unwrap();
        assert!(matches!(config.validate(), Err(SelfEncryptionError::Config(_))));

        config.chunking.max_raw_chunk_size = 1024;
        config.validate().unwrap();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SelfEncConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SelfEncConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.chunking.min_chunk_size, parsed.chunking.min_chunk_size);
        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.data_map.max_depth, parsed.data_map.max_depth);
    }
}
