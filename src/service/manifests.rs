//! Manifest service for the `manifests` commands
//!
//! Wraps the assembly pipeline with the operator-facing behaviour: several
//! tags per run, dry runs, skipping tags that are already up to date, and
//! mapping failures onto process exit codes.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    manifests::{
        build_manifest_reference, check_manifest_exists, collect_digest_files,
        create_and_push_manifest, health_check_registry, inspect_manifest, list_tags,
        merge_annotations, verify_digests_in_registry, ArchitectureInfo, AssemblyOptions,
        CreationOptions, DigestFile, ExistenceOptions, InspectOptions, ListOptions,
        ManifestInfo, PlatformInfo, VerificationOptions,
    },
    registry::RegistryBackend,
};

/// Failures grouped by the exit code the CLI reports for them
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad input or digest files that do not satisfy the requirements
    #[error(transparent)]
    Validation(anyhow::Error),
    /// The registry could not be reached or rejected an operation
    #[error(transparent)]
    Registry(anyhow::Error),
    /// A per-architecture digest is missing from the registry
    #[error(transparent)]
    DigestNotFound(anyhow::Error),
}

impl ServiceError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ServiceError::Validation(_) => 1,
            ServiceError::Registry(_) => 2,
            ServiceError::DigestNotFound(_) => 3,
        }
    }
}

/// Configuration for a `manifests create` run
#[derive(Debug, Clone, Default)]
pub struct CreateConfig {
    pub registry: String,
    pub namespace: String,
    pub image_name: String,
    pub tags: Vec<String>,
    pub digest_dir: PathBuf,
    pub required_architectures: Vec<String>,
    pub best_effort: bool,
    pub max_age: Option<Duration>,
    pub verify_registry: bool,
    pub verify_concurrency: i64,
    pub health_check: bool,
    pub force: bool,
    pub dry_run: bool,
    /// Raw `key=value` pairs
    pub annotations: Vec<String>,
    /// Raw `key=value` pairs
    pub labels: Vec<String>,
}

/// What happened to one tag
#[derive(Debug, Clone, PartialEq)]
pub enum TagStatus {
    Pushed { digest: String },
    UpToDate,
    /// Dry run: would have been pushed
    Planned,
}

#[derive(Debug, Clone)]
pub struct TagOutcome {
    pub tag: String,
    pub reference: String,
    pub status: TagStatus,
}

/// Result of a `manifests create` run
#[derive(Debug, Clone)]
pub struct CreateReport {
    pub files: Vec<DigestFile>,
    pub tags: Vec<TagOutcome>,
}

/// Parse `key=value` pairs. Keys and values are trimmed; the last duplicate wins.
pub fn parse_key_value_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid pair {:?}: expected format key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid pair {:?}: key cannot be empty", pair);
        }
        result.insert(key.to_string(), value.trim().to_string());
    }

    Ok(result)
}

/// Service for manifest list operations against one registry backend
pub struct ManifestService<'a> {
    backend: &'a dyn RegistryBackend,
}

impl<'a> ManifestService<'a> {
    pub fn new(backend: &'a dyn RegistryBackend) -> Self {
        Self { backend }
    }

    /// Discover digest files and publish a manifest list under every tag.
    ///
    /// Tags are pushed one after another. A failed tag does not stop the
    /// remaining ones, and tags pushed before a failure stay pushed.
    pub async fn create(&self, config: &CreateConfig) -> Result<CreateReport, ServiceError> {
        info!("Creating multi-arch manifest for {}", config.image_name);

        let annotations = parse_key_value_pairs(&config.annotations)
            .context("Failed to parse annotations")
            .map_err(ServiceError::Validation)?;
        let labels = parse_key_value_pairs(&config.labels)
            .context("Failed to parse labels")
            .map_err(ServiceError::Validation)?;

        let creation = CreationOptions {
            registry: config.registry.clone(),
            namespace: config.namespace.clone(),
            image_name: config.image_name.clone(),
            tag: String::new(),
            annotations,
            labels,
        };

        let files = collect_digest_files(&AssemblyOptions {
            creation: creation.clone(),
            digest_dir: config.digest_dir.clone(),
            max_age: config.max_age,
            required_architectures: config.required_architectures.clone(),
            best_effort: config.best_effort,
            verify_concurrency: None,
        })
        .map_err(ServiceError::Validation)?;

        let verification = VerificationOptions {
            registry: config.registry.clone(),
            namespace: config.namespace.clone(),
            max_concurrent: config.verify_concurrency,
        };

        if config.health_check {
            health_check_registry(self.backend, &verification).await;
        }

        if config.verify_registry {
            verify_digests_in_registry(self.backend, &files, &verification)
                .await
                .map_err(ServiceError::DigestNotFound)?;
        }

        let references: Vec<(String, String)> = config
            .tags
            .iter()
            .map(|tag| {
                let reference = build_manifest_reference(
                    &config.registry,
                    &config.namespace,
                    &config.image_name,
                    tag,
                );
                (tag.clone(), reference)
            })
            .collect();

        if config.dry_run {
            info!(
                "Dry run: would create manifest with {} architecture(s):",
                files.len()
            );
            for df in &files {
                info!("  - {}: {}", df.architecture, df.digest);
            }
            info!("Would push with {} tag(s):", references.len());
            for (_, reference) in &references {
                info!("  - {}", reference);
            }

            let tags = references
                .into_iter()
                .map(|(tag, reference)| TagOutcome {
                    tag,
                    reference,
                    status: TagStatus::Planned,
                })
                .collect();
            return Ok(CreateReport { files, tags });
        }

        let annotations = merge_annotations(&creation.annotations, &creation.labels);
        let mut outcomes = Vec::with_capacity(references.len());
        let mut failed = Vec::new();

        for (tag, reference) in references {
            if !config.force && self.is_up_to_date(&files, config, &tag, &annotations).await {
                info!(
                    "Manifest {} already exists and is up-to-date (use --force to recreate)",
                    reference
                );
                outcomes.push(TagOutcome {
                    tag,
                    reference,
                    status: TagStatus::UpToDate,
                });
                continue;
            }

            info!("Creating manifest for tag: {}", tag);
            let opts = CreationOptions {
                tag: tag.clone(),
                ..creation.clone()
            };

            match create_and_push_manifest(self.backend, &files, &opts).await {
                Ok(digest) => outcomes.push(TagOutcome {
                    tag,
                    reference,
                    status: TagStatus::Pushed { digest },
                }),
                Err(e) => {
                    error!("Failed to create/push manifest for tag {}: {:#}", tag, e);
                    failed.push(tag);
                }
            }
        }

        if !failed.is_empty() {
            let total = failed.len() + outcomes.len();
            error!(
                "Failed to push {} of {} tag(s): {}",
                failed.len(),
                total,
                failed.join(", ")
            );
            return Err(ServiceError::Registry(anyhow::anyhow!(
                "failed to push {} of {} tag(s): {}",
                failed.len(),
                total,
                failed.join(", ")
            )));
        }

        info!("Successfully processed all {} tag(s)", outcomes.len());
        Ok(CreateReport {
            files,
            tags: outcomes,
        })
    }

    /// Idempotency check for one tag. Lookup failures count as "not up to date".
    async fn is_up_to_date(
        &self,
        files: &[DigestFile],
        config: &CreateConfig,
        tag: &str,
        annotations: &BTreeMap<String, String>,
    ) -> bool {
        let opts = ExistenceOptions {
            registry: config.registry.clone(),
            namespace: config.namespace.clone(),
            image_name: config.image_name.clone(),
            tag: tag.to_string(),
            annotations: annotations.clone(),
        };

        match check_manifest_exists(self.backend, files, &opts).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Failed to check existing manifest: {:#}", e);
                false
            }
        }
    }

    pub async fn inspect(&self, opts: &InspectOptions) -> Result<ManifestInfo, ServiceError> {
        let reference =
            build_manifest_reference(&opts.registry, &opts.namespace, &opts.image_name, &opts.tag);
        info!("Inspecting manifest: {}", reference);

        inspect_manifest(self.backend, opts)
            .await
            .map_err(ServiceError::Registry)
    }

    pub async fn list_tags(&self, opts: &ListOptions) -> Result<Vec<String>, ServiceError> {
        list_tags(self.backend, opts)
            .await
            .map_err(ServiceError::Registry)
    }

    pub async fn health_check(&self, registry: &str) {
        health_check_registry(
            self.backend,
            &VerificationOptions {
                registry: registry.to_string(),
                ..Default::default()
            },
        )
        .await;
    }
}

/// Human-readable report for `manifests inspect`
pub fn render_manifest_info(info: &ManifestInfo) -> String {
    let kind = if info.is_multi_arch() {
        "multi-architecture manifest"
    } else {
        "single-architecture manifest"
    };

    let mut out = String::from("\n=== Manifest Information ===\n");
    out.push_str(&format!("Name:         {}\n", info.name));
    out.push_str(&format!("Tag:          {}\n", info.tag));
    out.push_str(&format!("Digest:       {}\n", info.digest));
    out.push_str(&format!("Media Type:   {} ({})\n", info.media_type, kind));
    out.push_str(&format!("Size:         {} bytes\n", info.size));

    if !info.annotations.is_empty() {
        out.push_str("\nAnnotations:\n");
        for (k, v) in &info.annotations {
            out.push_str(&format!("  {}: {}\n", k, v));
        }
    }

    if info.is_multi_arch() {
        out.push_str(&format!(
            "\n=== Architectures ({}) ===\n",
            info.architectures.len()
        ));
        for (i, arch) in info.architectures.iter().enumerate() {
            out.push_str(&format!("\n[{}] {}\n", i + 1, platform_of(arch)));
            out.push_str(&format!("    Manifest Digest: {}\n", arch.digest));
            out.push_str(&format!("    Size:            {} bytes\n", arch.size));
            if !arch.media_type.is_empty() {
                out.push_str(&format!("    Media Type:      {}\n", arch.media_type));
            }
        }
    } else if let Some(arch) = info.architectures.first() {
        out.push_str("\n=== Platform ===\n");
        if !arch.os.is_empty() {
            out.push_str(&format!("OS/Architecture: {}\n", platform_of(arch)));
        }
        out.push_str(&format!("Manifest Digest: {}\n", arch.digest));
        out.push_str(&format!("Size:            {} bytes\n", arch.size));
        if !arch.media_type.is_empty() {
            out.push_str(&format!("Media Type:      {}\n", arch.media_type));
        }
    }

    out
}

fn platform_of(arch: &ArchitectureInfo) -> PlatformInfo {
    PlatformInfo::new(&arch.os, &arch.architecture, &arch.variant)
}
