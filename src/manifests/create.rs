//! Multi-arch manifest assembly.
//!
//! [`assemble`] runs the whole pipeline for one tag: discover digest files,
//! validate them, filter to the required architectures, optionally verify
//! the digests remotely, then build and push the image index. Any failing
//! step aborts the run; nothing is pushed unless every step succeeds.

use super::digest::Digest;
use super::platform::PlatformInfo;
use super::reference::{build_digest_reference, build_manifest_reference};
use super::store::{discover_digest_files, DigestFile, DiscoveryOptions};
use super::validator::{
    filter_architectures, validate_digest_files, FilterOptions, ValidationOptions,
};
use super::verify::{verify_digests_in_registry, VerificationOptions};
use crate::manifest::{ImageIndex, ManifestDescriptor, Platform};
use crate::registry::RegistryBackend;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const LABEL_PREFIX: &str = "org.opencontainers.image.";

/// Destination and metadata of a manifest list
#[derive(Debug, Clone, Default)]
pub struct CreationOptions {
    pub registry: String,
    pub namespace: String,
    pub image_name: String,
    pub tag: String,
    pub annotations: BTreeMap<String, String>,
    /// Short label keys, stored as `org.opencontainers.image.<key>` annotations
    pub labels: BTreeMap<String, String>,
}

/// One child of a manifest list
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    /// `registry[/namespace]/image@digest`
    pub image_ref: String,
    pub digest: Digest,
    /// Architecture token from the digest file name
    pub architecture: String,
    pub platform: PlatformInfo,
}

/// Convert digest files into manifest list entries addressed by digest
pub fn manifest_entries(files: &[DigestFile], opts: &CreationOptions) -> Vec<ManifestEntry> {
    files
        .iter()
        .map(|df| ManifestEntry {
            image_ref: build_digest_reference(
                &opts.registry,
                &opts.namespace,
                &df.image_name,
                &df.digest,
            ),
            digest: df.digest.clone(),
            architecture: df.architecture.clone(),
            platform: PlatformInfo::from_arch_token(&df.architecture),
        })
        .collect()
}

/// Index annotations with labels folded in under the OCI key namespace.
///
/// Explicit annotations win over labels that map to the same key.
pub fn merge_annotations(
    annotations: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| {
            let key = if k.starts_with(LABEL_PREFIX) {
                k.clone()
            } else {
                format!("{}{}", LABEL_PREFIX, k)
            };
            (key, v.clone())
        })
        .collect();
    merged.extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Build an image index for `entries`.
///
/// Media type and size of each child come from the registry copy of the
/// per-architecture image.
pub async fn build_index(
    backend: &dyn RegistryBackend,
    entries: &[ManifestEntry],
    annotations: BTreeMap<String, String>,
) -> Result<ImageIndex> {
    let mut manifests = Vec::with_capacity(entries.len());

    for entry in entries {
        let descriptor = backend
            .fetch_descriptor(&entry.image_ref)
            .await
            .with_context(|| format!("Failed to get descriptor for {}", entry.image_ref))?;

        debug!(
            "Adding {} ({}, {} bytes) as {}",
            entry.digest, descriptor.media_type, descriptor.size, entry.platform
        );

        manifests.push(ManifestDescriptor {
            media_type: descriptor.media_type,
            size: descriptor.size,
            digest: entry.digest.to_string(),
            platform: Some(Platform {
                architecture: entry.platform.architecture.clone(),
                os: entry.platform.os.clone(),
                variant: Some(entry.platform.variant.clone()).filter(|v| !v.is_empty()),
            }),
        });
    }

    Ok(ImageIndex::new(manifests).with_annotations(annotations))
}

/// Build the manifest list for `files` and push it to the tag in `opts`.
///
/// Returns the digest of the pushed index.
pub async fn create_and_push_manifest(
    backend: &dyn RegistryBackend,
    files: &[DigestFile],
    opts: &CreationOptions,
) -> Result<String> {
    let reference =
        build_manifest_reference(&opts.registry, &opts.namespace, &opts.image_name, &opts.tag);
    info!(
        "Creating manifest list {} with {} architecture(s)",
        reference,
        files.len()
    );

    let entries = manifest_entries(files, opts);
    let index = build_index(
        backend,
        &entries,
        merge_annotations(&opts.annotations, &opts.labels),
    )
    .await?;

    let digest = backend
        .push_index(&reference, &index)
        .await
        .with_context(|| format!("Failed to push manifest list to {}", reference))?;

    info!("Pushed manifest list {} ({})", reference, digest);
    Ok(digest)
}

/// Everything one assembly run needs
#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    pub creation: CreationOptions,
    pub digest_dir: PathBuf,
    pub max_age: Option<Duration>,
    pub required_architectures: Vec<String>,
    pub best_effort: bool,
    /// `None` skips remote verification of the per-arch digests
    pub verify_concurrency: Option<i64>,
}

/// A published manifest list
#[derive(Debug, Clone)]
pub struct Assembly {
    pub reference: String,
    pub digest: String,
    pub files: Vec<DigestFile>,
}

/// Digest files that survive discovery, validation and filtering
pub fn collect_digest_files(opts: &AssemblyOptions) -> Result<Vec<DigestFile>> {
    let image_name = &opts.creation.image_name;

    let files = discover_digest_files(&DiscoveryOptions {
        image_name: image_name.clone(),
        directory: opts.digest_dir.clone(),
    })
    .context("Failed to discover digest files")?;

    if files.is_empty() {
        anyhow::bail!(
            "no digest files found in {} (expected files matching pattern: digest-{}-*.txt)",
            opts.digest_dir.display(),
            image_name
        );
    }

    info!("Found {} digest file(s):", files.len());
    for df in &files {
        info!("  - {}: {}", df.architecture, df.digest);
    }

    validate_digest_files(
        &files,
        &ValidationOptions {
            image_name: image_name.clone(),
            max_age: opts.max_age,
        },
    )
    .context("Digest validation failed")?;

    let files = filter_architectures(
        files,
        &FilterOptions {
            required_architectures: opts.required_architectures.clone(),
            best_effort: opts.best_effort,
        },
    )
    .context("Architecture filtering failed")?;

    if files.is_empty() {
        anyhow::bail!("no valid architectures found after filtering");
    }

    Ok(files)
}

/// Discover, validate, filter, verify, build and push
pub async fn assemble(backend: &dyn RegistryBackend, opts: &AssemblyOptions) -> Result<Assembly> {
    let files = collect_digest_files(opts)?;

    if let Some(max_concurrent) = opts.verify_concurrency {
        verify_digests_in_registry(
            backend,
            &files,
            &VerificationOptions {
                registry: opts.creation.registry.clone(),
                namespace: opts.creation.namespace.clone(),
                max_concurrent,
            },
        )
        .await?;
    }

    let digest = create_and_push_manifest(backend, &files, &opts.creation).await?;

    Ok(Assembly {
        reference: build_manifest_reference(
            &opts.creation.registry,
            &opts.creation.namespace,
            &opts.creation.image_name,
            &opts.creation.tag,
        ),
        digest,
        files,
    })
}
