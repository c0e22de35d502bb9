use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::verify::DEFAULT_CONCURRENCY;


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry used when `--registry` is not given
    pub default_registry: Option<String>,

    /// Namespace used when `--namespace` is not given
    #[serde(default)]
    pub namespace: String,

    /// Manifest assembly defaults
    #[serde(default)]
    pub manifests: ManifestsConfig,

    /// Registry connection settings
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestsConfig {
    /// Directory holding `digest-*.txt` files
    #[serde(default = "default_digest_dir")]
    pub digest_dir: PathBuf,

    /// Concurrent digest verification requests
    #[serde(default = "default_verify_concurrency")]
    pub verify_concurrency: i64,

    /// Architectures every manifest list must contain
    #[serde(default)]
    pub required_architectures: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registries reached over plain HTTP
    #[serde(default)]
    pub insecure: Vec<String>,

    /// Docker-style auth file checked before the standard locations
    pub auth_file: Option<PathBuf>,

    /// Abort a command after this many seconds
    pub timeout_secs: Option<u64>,
}

fn default_digest_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_verify_concurrency() -> i64 {
    DEFAULT_CONCURRENCY
}

impl Default for ManifestsConfig {
    fn default() -> Self {
        Self {
            digest_dir: default_digest_dir(),
            verify_concurrency: default_verify_concurrency(),
            required_architectures: Vec::new(),
        }
    }
}

impl Config {
    /// Path of the user config file, if a config directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imgforge").join("config.toml"))
    }

    /// Load the user config file, or defaults when it does not exist
    pub fn load() -> anyhow::Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}
