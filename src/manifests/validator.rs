use super::digest::SHA256;
use super::error::ManifestError;
use super::store::DigestFile;
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Checks applied to every discovered digest file
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    pub image_name: String,
    /// Files older than this are rejected; `None` disables the check
    pub max_age: Option<Duration>,
}

/// Which architectures a manifest must contain
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub required_architectures: Vec<String>,
    pub best_effort: bool,
}

/// Validate digest files, stopping at the first violation
pub fn validate_digest_files(
    files: &[DigestFile],
    opts: &ValidationOptions,
) -> Result<(), ManifestError> {
    let now = Utc::now();

    for df in files {
        if df.image_name != opts.image_name {
            return Err(ManifestError::ImageNameMismatch {
                path: df.path.clone(),
                expected: opts.image_name.clone(),
                actual: df.image_name.clone(),
            });
        }

        if df.digest.algorithm() != SHA256 {
            return Err(ManifestError::UnsupportedAlgorithm {
                path: df.path.clone(),
                algorithm: df.digest.algorithm().to_string(),
            });
        }

        // Files stamped in the future count as fresh
        let age = (now - df.mod_time).to_std().unwrap_or_default();
        if let Some(max_age) = opts.max_age.filter(|d| !d.is_zero()) {
            if age > max_age {
                return Err(ManifestError::TooOld {
                    path: df.path.clone(),
                    age,
                    max_age,
                });
            }
        }

        debug!(
            "Validated digest file: {} ({}, age: {}s)",
            df.path.display(),
            df.architecture,
            age.as_secs()
        );
    }

    Ok(())
}

/// Keep only the digest files for the required architectures.
///
/// With no requirements every file is returned. When a required architecture
/// is missing, strict mode fails and best-effort mode returns what matched.
pub fn filter_architectures(
    files: Vec<DigestFile>,
    opts: &FilterOptions,
) -> Result<Vec<DigestFile>, ManifestError> {
    if opts.required_architectures.is_empty() {
        let detected: Vec<&str> = files.iter().map(|f| f.architecture.as_str()).collect();
        info!(
            "Auto-detected {} architecture(s): {:?}",
            detected.len(),
            detected
        );
        return Ok(files);
    }

    let mut pending: BTreeSet<&str> = opts
        .required_architectures
        .iter()
        .map(String::as_str)
        .collect();

    let mut filtered = Vec::with_capacity(files.len());
    for df in files {
        if pending.remove(df.architecture.as_str()) {
            filtered.push(df);
        }
    }

    if !pending.is_empty() {
        let missing: Vec<String> = pending.into_iter().map(str::to_string).collect();
        if !opts.best_effort {
            return Err(ManifestError::MissingRequiredArchitectures { missing });
        }
        warn!("Some required architectures are missing: {:?}", missing);
        warn!(
            "Continuing in best-effort mode with {} available architecture(s)",
            filtered.len()
        );
    }

    Ok(filtered)
}
