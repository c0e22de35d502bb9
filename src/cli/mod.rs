use crate::constants::tag;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "imgforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "IMGFORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage multi-architecture manifests
    #[command(subcommand)]
    Manifests(ManifestsCommand),

    /// Work with per-architecture digest files
    #[command(subcommand)]
    Digest(DigestCommand),

    /// Registry utilities
    #[command(subcommand)]
    Registry(RegistryCommand),

    /// Show version information
    Version,
}

/// Where manifests live
#[derive(Args, Clone)]
pub struct RegistryArgs {
    /// Registry host (e.g., ghcr.io); falls back to the config file
    #[arg(long, env = "IMGFORGE_REGISTRY")]
    pub registry: Option<String>,

    /// Namespace or organization within the registry
    #[arg(long)]
    pub namespace: Option<String>,

    /// Docker-style auth file checked before the standard locations
    #[arg(long)]
    pub auth_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ManifestsCommand {
    /// Create and push a multi-architecture manifest from digest files
    Create(CreateArgs),

    /// Inspect a manifest in the registry
    Inspect {
        /// Image name
        #[arg(long)]
        name: String,

        #[command(flatten)]
        registry: RegistryArgs,

        /// Tag to inspect
        #[arg(long, default_value = tag::DEFAULT)]
        tag: String,
    },

    /// List tags of an image
    List {
        /// Image name
        #[arg(long)]
        name: String,

        #[command(flatten)]
        registry: RegistryArgs,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    /// Image name, as used in digest-{name}-{arch}.txt
    #[arg(long)]
    pub name: String,

    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Tags to push; can be repeated or comma-separated
    #[arg(long = "tag", value_delimiter = ',', default_value = tag::DEFAULT)]
    pub tags: Vec<String>,

    /// Directory containing digest files
    #[arg(long)]
    pub digest_dir: Option<PathBuf>,

    /// Architectures that must be present (e.g., amd64,arm64)
    #[arg(long, value_delimiter = ',')]
    pub require_arch: Vec<String>,

    /// Create the manifest with whatever required architectures are available
    #[arg(long)]
    pub best_effort: bool,

    /// Reject digest files older than this (e.g., 90s, 30m, 12h, 2d)
    #[arg(long, value_parser = parse_duration)]
    pub max_age: Option<Duration>,

    /// Verify every digest exists in the registry before creating the manifest
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub verify_registry: bool,

    /// Concurrent verification requests (default 5, max 20)
    #[arg(long)]
    pub verify_concurrency: Option<i64>,

    /// Probe the registry before doing any work
    #[arg(long)]
    pub health_check: bool,

    /// Push even when the registry already has an identical manifest
    #[arg(long)]
    pub force: bool,

    /// Show what would be pushed without pushing
    #[arg(long)]
    pub dry_run: bool,

    /// Index annotation in key=value format; can be repeated
    #[arg(long = "annotation")]
    pub annotations: Vec<String>,

    /// Label in key=value format, stored as org.opencontainers.image.<key>
    #[arg(long = "label")]
    pub labels: Vec<String>,
}

#[derive(Subcommand)]
pub enum DigestCommand {
    /// Record the digest of a pushed per-architecture image
    Save {
        /// Image name
        #[arg(long)]
        name: String,

        /// Architecture token (e.g., amd64, arm-v7)
        #[arg(long)]
        arch: String,

        /// Digest of the pushed image (sha256:...)
        #[arg(long)]
        digest: String,

        /// Directory to write the digest file to
        #[arg(long)]
        digest_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum RegistryCommand {
    /// Check that a registry is reachable
    Health {
        /// Registry host; falls back to the config file
        #[arg(long, env = "IMGFORGE_REGISTRY")]
        registry: Option<String>,

        /// Docker-style auth file checked before the standard locations
        #[arg(long)]
        auth_file: Option<PathBuf>,
    },
}

/// Parse `<n>[s|m|h|d]`; a bare number is seconds
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => s.split_at(i),
        None => (s, "s"),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {:?}", s))?;
    let seconds = match unit {
        "s" => value,
        "m" => value.saturating_mul(60),
        "h" => value.saturating_mul(60 * 60),
        "d" => value.saturating_mul(60 * 60 * 24),
        _ => return Err(format!("invalid duration unit {:?} in {:?}", unit, s)),
    };

    Ok(Duration::from_secs(seconds))
}
