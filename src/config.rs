use crate::models::{
    bucket::{DEFAULT_BUCKET, RECOMMENDED_BUCKET},
    file::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE},
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub chunk_size: usize,
    pub verify_hash: bool,
    pub assets_dir: PathBuf,
    pub buckets: Vec<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked image asset store for the storefront")]
pub struct Args {
    /// Host to bind to (overrides ASSET_STORE_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides ASSET_STORE_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Database URL (overrides ASSET_STORE_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Maximum chunk payload in bytes (overrides ASSET_STORE_CHUNK_SIZE)
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Recompute MD5 on every read (overrides ASSET_STORE_VERIFY_HASH)
    #[arg(long, global = true)]
    pub verify_hash: Option<bool>,

    /// Directory served under /assets and read by `import` (overrides ASSET_STORE_ASSETS_DIR)
    #[arg(long, global = true)]
    pub assets_dir: Option<PathBuf>,

    /// Comma-separated bucket names (overrides ASSET_STORE_BUCKETS)
    #[arg(long, global = true, value_delimiter = ',')]
    pub buckets: Option<Vec<String>>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply the schema and exit
    Migrate,
    /// Ingest catalog images and recommended images from the assets directory
    Import {
        /// JSON file mapping category -> list of products
        #[arg(long, default_value = "metadata.json")]
        metadata: PathBuf,
        /// Folder under the assets directory holding raw recommended images
        #[arg(long, default_value = "Recommended")]
        recommended_folder: String,
    },
    /// Reclaim chunks of ingestions that never finalized
    Sweep {
        /// Only pending files older than this many seconds are reclaimed
        #[arg(long, default_value_t = 3600)]
        older_than_secs: i64,
        /// Restrict the sweep to one bucket
        #[arg(long)]
        bucket: Option<String>,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the chosen command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        Self::from_sources(args, |key| env::var(key))
    }

    /// Merge CLI arguments over values produced by `lookup` (normally `env::var`).
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<(Self, Command)>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |key: &str| -> Result<Option<String>> {
            match lookup(key) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };

        // --- Environment fallback ---
        let env_host = var("ASSET_STORE_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match var("ASSET_STORE_PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing ASSET_STORE_PORT value `{}`", value))?,
            None => 5000,
        };
        let env_db = var("ASSET_STORE_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/asset_store.db".into());
        let env_chunk_size = match var("ASSET_STORE_CHUNK_SIZE")? {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing ASSET_STORE_CHUNK_SIZE value `{}`", value))?,
            None => DEFAULT_CHUNK_SIZE,
        };
        let env_verify = match var("ASSET_STORE_VERIFY_HASH")? {
            Some(value) => parse_bool(&value)
                .with_context(|| format!("parsing ASSET_STORE_VERIFY_HASH value `{}`", value))?,
            None => true,
        };
        let env_assets = var("ASSET_STORE_ASSETS_DIR")?.unwrap_or_else(|| "./assets".into());
        let env_buckets = var("ASSET_STORE_BUCKETS")?
            .map(|v| v.split(',').map(str::to_string).collect::<Vec<_>>());

        // --- Merge ---
        let chunk_size = args.chunk_size.unwrap_or(env_chunk_size);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            bail!(
                "chunk size {} out of range (1..={} bytes)",
                chunk_size,
                MAX_CHUNK_SIZE
            );
        }

        let mut buckets: Vec<String> = args
            .buckets
            .or(env_buckets)
            .unwrap_or_default()
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        for reserved in [DEFAULT_BUCKET, RECOMMENDED_BUCKET] {
            if !buckets.iter().any(|b| b == reserved) {
                buckets.push(reserved.to_string());
            }
        }
        buckets.sort();
        buckets.dedup();

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            chunk_size,
            verify_hash: args.verify_hash.unwrap_or(env_verify),
            assets_dir: args.assets_dir.unwrap_or_else(|| env_assets.into()),
            buckets,
        };

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}
