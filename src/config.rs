use crate::services::storage_service::max_age_hours;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub public_gateway: String,
    pub gc_max_age_hours: u64,
    pub gc_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Self-hosted IPFS gateway")]
pub struct Args {
    /// Host to bind to (overrides IPFS_GATEWAY_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides IPFS_GATEWAY_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where content is stored (overrides IPFS_GATEWAY_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IPFS_GATEWAY_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Public gateway used for generated URLs (overrides IPFS_GATEWAY_PUBLIC_GATEWAY)
    #[arg(long, global = true)]
    pub public_gateway: Option<String>,

    /// Age after which unpinned content is collected (overrides IPFS_GATEWAY_GC_MAX_AGE_HOURS)
    #[arg(long, global = true)]
    pub gc_max_age_hours: Option<u64>,

    /// Background GC period while serving, 0 disables (overrides IPFS_GATEWAY_GC_INTERVAL_SECS)
    #[arg(long, global = true)]
    pub gc_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP gateway (default)
    Serve,
    /// Add a file to the gateway
    Add { path: PathBuf },
    /// Add a JSON document read from a file
    AddJson {
        path: PathBuf,
        /// Name to record for the document
        #[arg(long)]
        name: Option<String>,
    },
    /// List objects, or a single object by CID
    Ls { cid: Option<String> },
    /// Show object metadata
    Get { cid: String },
    /// Write object content to stdout
    Cat { cid: String },
    /// Show object stats
    Stat { cid: String },
    /// Pin an object
    Pin { cid: String },
    /// Unpin an object
    Unpin { cid: String },
    /// Garbage collect unpinned content
    Gc {
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
    /// Print the public gateway URL for a CID
    Url {
        cid: String,
        #[arg(long)]
        gateway: Option<String>,
    },
    /// Export object metadata as a CAR-like JSON manifest
    Export {
        output: PathBuf,
        #[arg(required = true)]
        cids: Vec<String>,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig, migrate flag
    /// and the requested command.
    pub fn from_env_and_args() -> Result<(Self, bool, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let cfg = Self::from_args(&args)?;
        Ok((cfg, args.migrate, args.command.unwrap_or(Command::Serve)))
    }

    /// Merge explicit arguments over environment values and defaults.
    pub fn from_args(args: &Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("IPFS_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("IPFS_GATEWAY_PORT", 8080u16)?;
        let env_storage =
            env::var("IPFS_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/ipfs-store".into());
        let env_db = env::var("IPFS_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/ipfs.db".into());
        let env_gateway = env::var("IPFS_GATEWAY_PUBLIC_GATEWAY")
            .unwrap_or_else(|_| "https://ipfs.io".into());
        let env_max_age = env_number("IPFS_GATEWAY_GC_MAX_AGE_HOURS", 24u64)?;
        let env_interval = env_number("IPFS_GATEWAY_GC_INTERVAL_SECS", 0u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            public_gateway: args.public_gateway.clone().unwrap_or(env_gateway),
            gc_max_age_hours: args.gc_max_age_hours.unwrap_or(env_max_age),
            gc_interval_secs: args.gc_interval_secs.unwrap_or(env_interval),
        };

        if max_age_hours(cfg.gc_max_age_hours).is_none() {
            anyhow::bail!(
                "gc max age of {} hours is out of range",
                cfg.gc_max_age_hours
            );
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// GC age; values too large for a `Duration` mean "never collect".
    pub fn gc_max_age(&self) -> chrono::Duration {
        max_age_hours(self.gc_max_age_hours).unwrap_or(chrono::Duration::MAX)
    }
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
