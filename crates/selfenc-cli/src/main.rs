//! selfenc: self-encrypting chunk store CLI
//!
//! Commands:
//!   put <file> [--out <path>] [--public]
//!                               - self-encrypt a file into the chunk store
//!   get <datamap> <file> [--public]
//!                               - restore a file from its data map handle
//!   info <datamap>              - describe a data map handle
//!   health                      - check the chunk store is reachable
//!   config show                 - display current configuration

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use selfenc_core::{Address, SelfEncConfig};
use selfenc_crypto::DataMapChunk;
use selfenc_storage::{ProgressFn, S3Credentials};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "selfenc",
    version,
    about = "Self-encrypting content-addressed chunk store",
    long_about = "selfenc: split files into convergently encrypted chunks and restore them from a data map"
)]
struct Cli {
    /// Path to selfenc.toml configuration file
    #[arg(long, short = 'c', env = "SELFENC_CONFIG", default_value = "selfenc.toml")]
    config: PathBuf,

    /// Log level filter (overrides [log] level; RUST_LOG takes precedence)
    #[arg(long, env = "SELFENC_LOG")]
    log: Option<String>,

    /// Log output format (overrides [log] format)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Self-encrypt a file and store its chunks
    ///
    /// S3 credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY.
    Put {
        /// File to encrypt
        file: PathBuf,
        /// Write the data map handle here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Also store the data map and print its address instead of the
        /// handle. Anyone holding the address can read the file.
        #[arg(long)]
        public: bool,
    },

    /// Restore a file from a data map handle
    Get {
        /// File holding the hex data map handle printed by `put`
        /// (or the hex address printed by `put --public`)
        datamap: PathBuf,
        /// Destination file
        file: PathBuf,
        /// Treat `datamap` as a public address
        #[arg(long)]
        public: bool,
    },

    /// Describe a data map handle without fetching any chunk
    Info {
        /// File holding the hex data map handle
        datamap: PathBuf,
    },

    /// Check the configured chunk store is reachable
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format);

    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Put { file, out, public } => {
            cmd_put(&config, &file, out.as_deref(), public).await
        }
        Commands::Get {
            datamap,
            file,
            public,
        } => cmd_get(&config, &datamap, &file, public).await,
        Commands::Info { datamap } => cmd_info(&datamap).await,
        Commands::Health => cmd_health(&config).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<(SelfEncConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((SelfEncConfig::default(), false))
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so `put` output stays pipeable
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Storage operator ──────────────────────────────────────────────────────────

/// Build the configured operator. S3 credentials come from the standard
/// AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY environment variables.
fn build_operator(config: &SelfEncConfig) -> Result<opendal::Operator> {
    let credentials = if config.storage.backend == "s3" {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("SELFENC_ACCESS_KEY_ID"))
            .context(
                "S3 credentials not set\n\
                 Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.",
            )?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("SELFENC_SECRET_ACCESS_KEY"))
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        Some(S3Credentials {
            access_key_id,
            secret_access_key,
        })
    } else {
        None
    };

    selfenc_storage::build_operator(&config.storage, credentials.as_ref())
        .context("building storage operator")
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_fn(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

async fn read_handle(path: &Path) -> Result<DataMapChunk> {
    let hex = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading data map handle: {}", path.display()))?;
    DataMapChunk::from_hex(&hex).with_context(|| format!("decoding data map handle: {}", path.display()))
}

async fn read_address(path: &Path) -> Result<Address> {
    let hex = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading public address: {}", path.display()))?;
    Address::from_hex(hex.trim()).with_context(|| format!("decoding public address: {}", path.display()))
}

// ── `selfenc put` ─────────────────────────────────────────────────────────────

async fn cmd_put(
    config: &SelfEncConfig,
    file: &Path,
    out: Option<&Path>,
    public: bool,
) -> Result<()> {
    let op = build_operator(config)?;
    let payload = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let source_path = file.to_path_buf();
    let source = tokio::task::spawn_blocking(move || selfenc_chunks::hash_file(&source_path))
        .await
        .context("hash task panicked")??;

    let pb = make_progress_bar("put");
    pb.set_message("encrypting".to_string());
    let progress = progress_fn(&pb);

    let payload = Bytes::from(payload);
    let prefix = &config.storage.prefix;
    let result = if public {
        selfenc_storage::upload_public(&op, prefix, payload, config, Some(&progress)).await
    } else {
        selfenc_storage::upload(&op, prefix, payload, config, Some(&progress)).await
    }
    .with_context(|| format!("uploading {}", file.display()))?;
    pb.finish_and_clear();

    let hex = if public {
        result.datamap.address().to_hex()
    } else {
        result.datamap.to_hex()
    };
    match out {
        Some(path) => {
            tokio::fs::write(path, &hex)
                .await
                .with_context(|| format!("writing data map handle: {}", path.display()))?;
            let what = if public { "public address" } else { "data map" };
            eprintln!("{what} written to {}", path.display());
        }
        None => println!("{hex}"),
    }

    eprintln!("  bytes:    {}", fmt_bytes(result.bytes));
    eprintln!("  chunks:   {} ({} new)", result.chunks, result.written);
    eprintln!("  levels:   {}", result.level);
    eprintln!("  source:   {source}");
    eprintln!("  address:  {}", result.datamap.address());
    Ok(())
}

// ── `selfenc get` ─────────────────────────────────────────────────────────────

async fn cmd_get(config: &SelfEncConfig, datamap: &Path, file: &Path, public: bool) -> Result<()> {
    let op = build_operator(config)?;
    let prefix = &config.storage.prefix;

    let pb = make_progress_bar("get");
    let progress = progress_fn(&pb);
    let result = if public {
        let address = read_address(datamap).await?;
        selfenc_storage::download_public(&op, prefix, &address, &config.data_map, Some(&progress))
            .await
            .with_context(|| format!("downloading public data {address}"))?
    } else {
        let handle = read_handle(datamap).await?;
        selfenc_storage::download(&op, prefix, &handle, &config.data_map, Some(&progress))
            .await
            .with_context(|| format!("downloading {}", handle.address()))?
    };
    pb.finish_and_clear();

    // Atomic write to the destination
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }
    let tmp = file.with_extension("selfenc_tmp");
    tokio::fs::write(&tmp, &result.payload)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, file)
        .await
        .with_context(|| format!("renaming {} → {}", tmp.display(), file.display()))?;

    // Matches the `source` line printed by `put`
    let source = selfenc_chunks::hash_bytes_parallel(&result.payload);
    info!(path = %file.display(), bytes = result.payload.len(), %source, "restored file");
    eprintln!(
        "restored {} ({}, {} chunks)",
        file.display(),
        fmt_bytes(result.payload.len() as u64),
        result.chunks
    );
    eprintln!("  source:   {source}");
    Ok(())
}

// ── `selfenc info` ────────────────────────────────────────────────────────────

async fn cmd_info(datamap: &Path) -> Result<()> {
    let handle = read_handle(datamap).await?;
    let map = handle.to_map()?;

    println!("address:  {}", handle.address());
    println!("kind:     {}", if map.is_pointer() { "pointer" } else { "direct" });
    println!("level:    {}", map.level());
    println!("chunks:   {}", map.chunks().len());
    if map.is_pointer() {
        println!("map size: {}", fmt_bytes(map.data_size()));
    } else {
        println!("size:     {}", fmt_bytes(map.data_size()));
    }
    Ok(())
}

// ── `selfenc health` ──────────────────────────────────────────────────────────

async fn cmd_health(config: &SelfEncConfig) -> Result<()> {
    let op = build_operator(config)?;
    selfenc_storage::check_health(&op).await?;
    println!("storage ({}): ok", config.storage.backend);
    Ok(())
}

// ── `selfenc config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &SelfEncConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    let rendered = toml::to_string_pretty(config).context("serializing config")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    match bytes {
        b if b >= GIB => format!("{:.2} GiB", b as f64 / GIB as f64),
        b if b >= MIB => format!("{:.2} MiB", b as f64 / MIB as f64),
        b if b >= KIB => format!("{:.2} KiB", b as f64 / KIB as f64),
        b => format!("{b} B"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.00 KiB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.00 MiB");
    }

    #[test]
    fn test_cli_parses_put() {
        let cli = Cli::try_parse_from(["selfenc", "put", "a.bin", "--out", "a.map"]).unwrap();
        match cli.command {
            Commands::Put { file, out, public } => {
                assert_eq!(file, PathBuf::from("a.bin"));
                assert_eq!(out, Some(PathBuf::from("a.map")));
                assert!(!public);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_config_missing_file_defaults() {
        let (config, found) = load_config(Path::new("/nonexistent/selfenc.toml"))
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(config.storage.backend, "fs");
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("selfenc.toml");
        std::fs::write(&path, "[storage]\nbackend = \"memory\"\n").unwrap();

        let (config, found) = load_config(&path).await.unwrap();
        assert!(found);
        assert_eq!(config.storage.backend, "memory");
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_on_fs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = SelfEncConfig::default();
        config.storage.root = tmp.path().join("store");

        let src = tmp.path().join("in.txt");
        let handle = tmp.path().join("in.map");
        let dst = tmp.path().join("out/in.txt");
        std::fs::write(&src, b"round trip through the command handlers").unwrap();

        cmd_put(&config, &src, Some(&handle), false).await.unwrap();
        cmd_info(&handle).await.unwrap();
        cmd_get(&config, &handle, &dst, false).await.unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), std::fs::read(&src).unwrap());
    }

    #[tokio::test]
    async fn test_public_put_get_by_address() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = SelfEncConfig::default();
        config.storage.root = tmp.path().join("store");

        let src = tmp.path().join("pub.txt");
        let addr_file = tmp.path().join("pub.addr");
        let dst = tmp.path().join("pub.out");
        std::fs::write(&src, b"anyone with the address can read this").unwrap();

        cmd_put(&config, &src, Some(&addr_file), true).await.unwrap();
        let written = std::fs::read_to_string(&addr_file).unwrap();
        assert_eq!(written.len(), 64);

        cmd_get(&config, &addr_file, &dst, true).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), std::fs::read(&src).unwrap());
    }
}
