use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures reading, writing and validating digest files
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("empty digest provided")]
    EmptyDigest,

    #[error("invalid filename format: {name} (expected digest-*-*.txt)")]
    InvalidFilename { name: String },

    #[error("invalid filename format: {name} (unknown architecture)")]
    UnknownArchitecture { name: String },

    #[error("invalid digest format in {}: {value:?}", path.display())]
    InvalidDigest { path: PathBuf, value: String },

    #[error("invalid digest file pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "digest file {} has incorrect image name: expected {expected}, got {actual}",
        path.display()
    )]
    ImageNameMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(
        "digest file {} uses unsupported algorithm: {algorithm} (expected sha256)",
        path.display()
    )]
    UnsupportedAlgorithm { path: PathBuf, algorithm: String },

    #[error(
        "digest file {} is too old: {}s (max age: {}s)",
        path.display(),
        age.as_secs(),
        max_age.as_secs()
    )]
    TooOld {
        path: PathBuf,
        age: Duration,
        max_age: Duration,
    },

    #[error(
        "missing required architectures: {} (use --best-effort to create partial manifest)",
        missing.join(", ")
    )]
    MissingRequiredArchitectures { missing: Vec<String> },
}

impl ManifestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
