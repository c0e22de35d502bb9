//! On-disk digest files written by per-architecture builds.
//!
//! Each build records the digest of the image it pushed in
//! `digest-{image}-{arch}.txt`. Manifest creation later discovers these files
//! to learn which architectures exist and what they point at.

use super::digest::Digest;
use super::error::ManifestError;
use crate::constants::{arch, digest_file};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A digest file discovered on disk
#[derive(Debug, Clone, PartialEq)]
pub struct DigestFile {
    pub path: PathBuf,
    pub image_name: String,
    pub architecture: String,
    pub digest: Digest,
    pub mod_time: DateTime<Utc>,
}

/// Where to look for digest files, and for which image
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub image_name: String,
    pub directory: PathBuf,
}

/// File name used for an image/architecture pair
pub fn digest_file_name(image_name: &str, arch: &str) -> String {
    format!(
        "{}{}-{}{}",
        digest_file::PREFIX,
        image_name,
        arch,
        digest_file::SUFFIX
    )
}

/// Write `digest` to `dir/digest-{image}-{arch}.txt`, creating `dir` as needed.
///
/// The digest is stored verbatim; it is validated when the file is read back.
pub fn save_digest_to_file(
    image_name: &str,
    arch: &str,
    digest: &str,
    dir: &Path,
) -> Result<PathBuf, ManifestError> {
    if digest.is_empty() {
        return Err(ManifestError::EmptyDigest);
    }

    fs::create_dir_all(dir).map_err(|e| ManifestError::io(dir, e))?;

    let path = dir.join(digest_file_name(image_name, arch));
    fs::write(&path, digest).map_err(|e| ManifestError::io(&path, e))?;

    info!("Saved digest to {}", path.display());
    Ok(path)
}

/// Split `{image}-{arch}` using the known architecture suffixes
fn split_name_arch(name_arch: &str) -> Option<(&str, &'static str)> {
    arch::KNOWN.iter().find_map(|arch| {
        name_arch
            .strip_suffix(arch)
            .and_then(|rest| rest.strip_suffix('-'))
            .map(|image| (image, *arch))
    })
}

/// Parse a single digest file
pub fn parse_digest_file(path: &Path) -> Result<DigestFile, ManifestError> {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name_arch = basename
        .strip_prefix(digest_file::PREFIX)
        .and_then(|rest| rest.strip_suffix(digest_file::SUFFIX))
        .ok_or_else(|| ManifestError::InvalidFilename {
            name: basename.clone(),
        })?;

    let (image_name, architecture) =
        split_name_arch(name_arch).ok_or_else(|| ManifestError::UnknownArchitecture {
            name: basename.clone(),
        })?;

    let bytes = fs::read(path).map_err(|e| ManifestError::io(path, e))?;
    let content = String::from_utf8(bytes).map_err(|e| ManifestError::InvalidDigest {
        path: path.to_path_buf(),
        value: String::from_utf8_lossy(e.as_bytes()).trim().to_string(),
    })?;
    let value = content.trim();
    let digest: Digest = value.parse().map_err(|_| ManifestError::InvalidDigest {
        path: path.to_path_buf(),
        value: value.to_string(),
    })?;

    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| ManifestError::io(path, e))?;

    Ok(DigestFile {
        path: path.to_path_buf(),
        image_name: image_name.to_string(),
        architecture: architecture.to_string(),
        digest,
        mod_time: DateTime::<Utc>::from(modified),
    })
}

/// Find and parse every digest file for `opts.image_name` in `opts.directory`.
///
/// Files that fail to parse are logged and skipped; only an unusable glob
/// pattern is an error. Results are ordered by path.
pub fn discover_digest_files(opts: &DiscoveryOptions) -> Result<Vec<DigestFile>, ManifestError> {
    info!("Discovering digest files in {}", opts.directory.display());

    let pattern = format!(
        "{}{}{}{}-*{}",
        glob::Pattern::escape(&opts.directory.to_string_lossy()),
        std::path::MAIN_SEPARATOR,
        digest_file::PREFIX,
        glob::Pattern::escape(&opts.image_name),
        digest_file::SUFFIX
    );

    let entries = glob::glob(&pattern).map_err(|source| ManifestError::InvalidPattern {
        pattern: pattern.clone(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping unreadable path {}: {}", e.path().display(), e);
                None
            }
        })
        .collect();
    paths.sort();

    let mut digest_files = Vec::with_capacity(paths.len());
    for path in paths {
        match parse_digest_file(&path) {
            Ok(df) => {
                debug!("Found {} digest {}", df.architecture, df.digest);
                digest_files.push(df);
            }
            Err(e) => warn!("Skipping invalid digest file {}: {}", path.display(), e),
        }
    }

    Ok(digest_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_digest(c: char) -> String {
        format!("sha256:{}", c.to_string().repeat(64))
    }

    #[test]
    fn test_save_then_parse_round_trip() {
        let dir = TempDir::new().unwrap();
        for arch in arch::KNOWN {
            let digest = sample_digest('b');
            let path = save_digest_to_file("webapp", arch, &digest, dir.path()).unwrap();
            let df = parse_digest_file(&path).unwrap();
            assert_eq!(df.image_name, "webapp");
            assert_eq!(df.architecture, arch);
            assert_eq!(df.digest, digest.parse::<Digest>().unwrap());
        }
    }

    #[test]
    fn test_save_creates_nested_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = save_digest_to_file("app", "amd64", &sample_digest('c'), &nested).unwrap();
        assert!(path.exists());
        assert_eq!(fs::read_to_string(path).unwrap(), sample_digest('c'));
    }

    #[test]
    fn test_save_rejects_empty_digest() {
        let dir = TempDir::new().unwrap();
        let err = save_digest_to_file("app", "amd64", "", dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::EmptyDigest));
    }

    #[test]
    fn test_parse_trims_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("digest-app-arm64.txt");
        fs::write(&path, format!("{}\n  ", sample_digest('d'))).unwrap();
        let df = parse_digest_file(&path).unwrap();
        assert_eq!(df.digest.to_string(), sample_digest('d'));
    }

    #[test]
    fn test_parse_image_name_with_dashes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("digest-attack-box-arm-v7.txt");
        fs::write(&path, sample_digest('e')).unwrap();
        let df = parse_digest_file(&path).unwrap();
        assert_eq!(df.image_name, "attack-box");
        assert_eq!(df.architecture, "arm-v7");
    }

    #[test]
    fn test_parse_rejects_bad_filenames() {
        let dir = TempDir::new().unwrap();
        for name in ["app-amd64.txt", "digest-app-amd64.json", "notes.txt"] {
            let path = dir.path().join(name);
            fs::write(&path, sample_digest('a')).unwrap();
            assert!(
                matches!(
                    parse_digest_file(&path),
                    Err(ManifestError::InvalidFilename { .. })
                ),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_parse_rejects_unknown_architecture() {
        let dir = TempDir::new().unwrap();
        for name in ["digest-app-mips.txt", "digest-app-arm.txt", "digest-amd64.txt"] {
            let path = dir.path().join(name);
            fs::write(&path, sample_digest('a')).unwrap();
            assert!(
                matches!(
                    parse_digest_file(&path),
                    Err(ManifestError::UnknownArchitecture { .. })
                ),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_parse_rejects_invalid_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("digest-app-amd64.txt");
        fs::write(&path, "sha256:nothex").unwrap();
        assert!(matches!(
            parse_digest_file(&path),
            Err(ManifestError::InvalidDigest { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_non_utf8_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("digest-app-amd64.txt");
        fs::write(&path, [0xff, 0xfe, b's', b'h', b'a']).unwrap();
        assert!(matches!(
            parse_digest_file(&path),
            Err(ManifestError::InvalidDigest { .. })
        ));
    }

    #[test]
    fn test_discover_skips_invalid_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("digest-demo-amd64.txt"), sample_digest('1')).unwrap();
        fs::write(dir.path().join("digest-demo-arm64.txt"), "garbage").unwrap();
        fs::write(dir.path().join("digest-other-amd64.txt"), sample_digest('2')).unwrap();

        let files = discover_digest_files(&DiscoveryOptions {
            image_name: "demo".to_string(),
            directory: dir.path().to_path_buf(),
        })
        .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].architecture, "amd64");
        assert_eq!(files[0].image_name, "demo");
    }

    #[test]
    fn test_discover_empty_directory() {
        let dir = TempDir::new().unwrap();
        let files = discover_digest_files(&DiscoveryOptions {
            image_name: "demo".to_string(),
            directory: dir.path().to_path_buf(),
        })
        .unwrap();
        assert!(files.is_empty());
    }
}
