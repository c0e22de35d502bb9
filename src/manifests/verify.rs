//! Registry-side checks run before a manifest list is assembled.

use super::inspect::is_multi_arch_media_type;
use super::reference::{build_digest_reference, build_manifest_reference};
use super::store::DigestFile;
use crate::constants::verify::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use crate::manifest::ImageIndex;
use crate::registry::{is_not_found, RegistryBackend};
use anyhow::{Context, Result};
use futures::stream::{self, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Where per-architecture digests are expected to live
#[derive(Debug, Clone, Default)]
pub struct VerificationOptions {
    pub registry: String,
    pub namespace: String,
    /// Upper bound on simultaneous registry requests (`<= 0` selects the default)
    pub max_concurrent: i64,
}

/// Target of the idempotency check
#[derive(Debug, Clone, Default)]
pub struct ExistenceOptions {
    pub registry: String,
    pub namespace: String,
    pub image_name: String,
    pub tag: String,
    /// Index annotations the new manifest list would carry, labels merged in
    pub annotations: BTreeMap<String, String>,
}

/// Concurrency actually used for `requested`: 5 when unset, never above 20
pub fn effective_concurrency(requested: i64) -> usize {
    let limit = if requested <= 0 {
        DEFAULT_CONCURRENCY
    } else if requested > MAX_CONCURRENCY {
        debug!(
            "Clamping verification concurrency from {} to {}",
            requested, MAX_CONCURRENCY
        );
        MAX_CONCURRENCY
    } else {
        requested
    };
    limit as usize
}

/// Check that every digest in `files` can be fetched from the registry.
///
/// Checks run concurrently up to [`effective_concurrency`]. The first
/// failure is returned and the checks still in flight are dropped.
pub async fn verify_digests_in_registry(
    backend: &dyn RegistryBackend,
    files: &[DigestFile],
    opts: &VerificationOptions,
) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }

    let limit = effective_concurrency(opts.max_concurrent);
    info!(
        "Verifying {} digest(s) in registry {} (concurrency {})",
        files.len(),
        opts.registry,
        limit
    );

    stream::iter(files.iter().map(Ok::<_, anyhow::Error>))
        .try_for_each_concurrent(limit, |df| async move {
            let reference =
                build_digest_reference(&opts.registry, &opts.namespace, &df.image_name, &df.digest);
            debug!("Verifying {} digest at {}", df.architecture, reference);

            backend.fetch_descriptor(&reference).await.with_context(|| {
                format!(
                    "registry verification failed for {} digest {} at {} \
                     (use --verify-registry=false to skip this check)",
                    df.architecture, df.digest, reference
                )
            })?;

            debug!("Verified {} digest {}", df.architecture, df.digest);
            Ok::<(), anyhow::Error>(())
        })
        .await?;

    info!("All {} digest(s) verified in registry", files.len());
    Ok(())
}

/// Reference fetched by the health check for `registry`
fn health_check_reference(registry: &str) -> String {
    if registry == "ghcr.io" {
        format!("{}/hello-world/hello-world:latest", registry)
    } else {
        format!("{}/library/hello-world:latest", registry)
    }
}

/// Fetch a well-known public image to check that the registry is reachable.
///
/// Advisory only: failures are logged as warnings and never returned.
pub async fn health_check_registry(backend: &dyn RegistryBackend, opts: &VerificationOptions) {
    let reference = health_check_reference(&opts.registry);
    info!("Checking registry health via {}", reference);

    match backend.fetch_descriptor(&reference).await {
        Ok(_) => info!("Registry {} is reachable", opts.registry),
        Err(e) => warn!(
            "Registry health check for {} failed: {:#}",
            opts.registry, e
        ),
    }
}

/// Whether the manifest list at the target tag already references exactly
/// the digests in `files` and carries exactly `opts.annotations`.
///
/// Returns `false` for no files, a missing manifest, a single-arch manifest,
/// or any difference in the set of child digests or in the annotations.
pub async fn check_manifest_exists(
    backend: &dyn RegistryBackend,
    files: &[DigestFile],
    opts: &ExistenceOptions,
) -> Result<bool> {
    if files.is_empty() {
        return Ok(false);
    }

    let reference =
        build_manifest_reference(&opts.registry, &opts.namespace, &opts.image_name, &opts.tag);

    let descriptor = match backend.fetch_descriptor(&reference).await {
        Ok(d) => d,
        Err(e) if is_not_found(&e) => {
            debug!("No existing manifest at {}", reference);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    if !is_multi_arch_media_type(&descriptor.media_type) {
        debug!(
            "Existing manifest at {} is not a manifest list ({})",
            reference, descriptor.media_type
        );
        return Ok(false);
    }

    let index: ImageIndex = serde_json::from_slice(&descriptor.data)
        .with_context(|| format!("Failed to parse manifest list at {}", reference))?;

    let existing: BTreeSet<&str> = index.manifests.iter().map(|m| m.digest.as_str()).collect();
    let proposed: BTreeSet<String> = files.iter().map(|df| df.digest.to_string()).collect();
    let proposed: BTreeSet<&str> = proposed.iter().map(String::as_str).collect();

    let existing_annotations = index.annotations.unwrap_or_default();
    let up_to_date = existing == proposed && existing_annotations == opts.annotations;
    debug!(
        "Existing manifest at {} has {} child(ren) and {} annotation(s), \
         proposed {} and {}: up to date = {}",
        reference,
        existing.len(),
        existing_annotations.len(),
        proposed.len(),
        opts.annotations.len(),
        up_to_date
    );
    Ok(up_to_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestDescriptor, Platform};
    use crate::manifests::digest::Digest;
    use crate::manifests::platform::PlatformInfo;
    use crate::registry::{Descriptor, MemoryRegistry};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn digest_file(image: &str, arch: &str, digest: &Digest) -> DigestFile {
        DigestFile {
            path: PathBuf::from(format!("digest-{}-{}.txt", image, arch)),
            image_name: image.to_string(),
            architecture: arch.to_string(),
            digest: digest.clone(),
            mod_time: Utc::now(),
        }
    }

    fn opts(max_concurrent: i64) -> VerificationOptions {
        VerificationOptions {
            registry: "reg.local".to_string(),
            namespace: "test".to_string(),
            max_concurrent,
        }
    }

    /// Backend that records peak parallelism and fails on one reference
    #[derive(Default)]
    struct Tracking {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl RegistryBackend for Tracking {
        async fn fetch_descriptor(&self, reference: &str) -> Result<Descriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.fail_on.as_deref() == Some(reference) {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("manifest unknown");
            }
            if self.fail_on.is_some() {
                // Siblings of a failing check never finish on their own
                futures::future::pending::<()>().await;
            }

            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Descriptor::from_bytes(b"{}".to_vec()))
        }

        async fn list_tags(&self, _repository: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn push_index(&self, _reference: &str, _index: &ImageIndex) -> Result<String> {
            anyhow::bail!("read-only")
        }
    }

    fn many_files(n: usize) -> Vec<DigestFile> {
        (0..n)
            .map(|i| digest_file("app", "amd64", &Digest::sha256_of(i.to_string().as_bytes())))
            .collect()
    }

    #[test]
    fn test_effective_concurrency() {
        assert_eq!(effective_concurrency(0), 5);
        assert_eq!(effective_concurrency(-3), 5);
        assert_eq!(effective_concurrency(1), 1);
        assert_eq!(effective_concurrency(20), 20);
        assert_eq!(effective_concurrency(21), 20);
        assert_eq!(effective_concurrency(1000), 20);
    }

    #[test]
    fn test_health_check_reference() {
        assert_eq!(
            health_check_reference("docker.io"),
            "docker.io/library/hello-world:latest"
        );
        assert_eq!(
            health_check_reference("ghcr.io"),
            "ghcr.io/hello-world/hello-world:latest"
        );
    }

    #[tokio::test]
    async fn test_empty_list_makes_no_calls() {
        let registry = MemoryRegistry::new();
        verify_digests_in_registry(&registry, &[], &opts(5))
            .await
            .unwrap();
        assert_eq!(registry.requests(), 0);
    }

    #[tokio::test]
    async fn test_verify_present_digests() {
        let registry = MemoryRegistry::new();
        let amd = registry.put_image(
            "reg.local/test/app",
            None,
            &PlatformInfo::new("linux", "amd64", ""),
            "1",
        );
        let arm = registry.put_image(
            "reg.local/test/app",
            None,
            &PlatformInfo::new("linux", "arm64", ""),
            "2",
        );

        let files = vec![
            digest_file("app", "amd64", &amd),
            digest_file("app", "arm64", &arm),
        ];
        verify_digests_in_registry(&registry, &files, &opts(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_digest_fails_verification() {
        let registry = MemoryRegistry::new();
        let missing = Digest::sha256_of(b"never pushed");
        let files = vec![digest_file("app", "amd64", &missing)];

        let err = verify_digests_in_registry(&registry, &files, &opts(5))
            .await
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("verification failed"));
        assert!(message.contains("--verify-registry=false"));
        assert!(message.contains(&missing.to_string()));
    }

    #[tokio::test]
    async fn test_first_failure_cancels_siblings() {
        let files = many_files(4);
        let failing = build_digest_reference("reg.local", "test", "app", &files[2].digest);
        let backend = Tracking {
            fail_on: Some(failing),
            ..Default::default()
        };

        let err = verify_digests_in_registry(&backend, &files, &opts(5))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("verification failed"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let files = many_files(40);

        let backend = Tracking::default();
        verify_digests_in_registry(&backend, &files, &opts(100))
            .await
            .unwrap();
        assert!(backend.peak.load(Ordering::SeqCst) <= 20);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 40);

        let backend = Tracking::default();
        verify_digests_in_registry(&backend, &files, &opts(0))
            .await
            .unwrap();
        assert!(backend.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_health_check_never_fails() {
        // Nothing is stored, so every fetch misses
        let registry = MemoryRegistry::new();
        health_check_registry(&registry, &opts(0)).await;
        assert_eq!(registry.requests(), 1);
    }

    fn existence() -> ExistenceOptions {
        ExistenceOptions {
            registry: "reg.local".to_string(),
            namespace: "test".to_string(),
            image_name: "app".to_string(),
            tag: "v1".to_string(),
            ..Default::default()
        }
    }

    fn push_list(registry: &MemoryRegistry, digests: &[&Digest]) {
        push_annotated_list(registry, digests, BTreeMap::new());
    }

    fn push_annotated_list(
        registry: &MemoryRegistry,
        digests: &[&Digest],
        annotations: BTreeMap<String, String>,
    ) {
        let manifests = digests
            .iter()
            .map(|d| ManifestDescriptor {
                media_type: crate::constants::media_type::OCI_MANIFEST.to_string(),
                size: 10,
                digest: d.to_string(),
                platform: Some(Platform {
                    architecture: "amd64".to_string(),
                    os: "linux".to_string(),
                    variant: None,
                }),
            })
            .collect();
        let index = ImageIndex::new(manifests).with_annotations(annotations);
        let data = serde_json::to_vec(&index).unwrap();
        registry.put_manifest("reg.local/test/app", Some("v1"), data);
    }

    #[tokio::test]
    async fn test_check_manifest_exists() {
        let registry = MemoryRegistry::new();
        let amd = Digest::sha256_of(b"amd");
        let arm = Digest::sha256_of(b"arm");
        let files = vec![digest_file("app", "amd64", &amd), digest_file("app", "arm64", &arm)];

        // No files, nothing to compare
        assert!(!check_manifest_exists(&registry, &[], &existence()).await.unwrap());
        // Nothing pushed yet
        assert!(!check_manifest_exists(&registry, &files, &existence()).await.unwrap());

        push_list(&registry, &[&amd]);
        assert!(!check_manifest_exists(&registry, &files, &existence()).await.unwrap());

        push_list(&registry, &[&arm, &amd]);
        assert!(check_manifest_exists(&registry, &files, &existence()).await.unwrap());
    }

    #[tokio::test]
    async fn test_changed_annotations_are_not_up_to_date() {
        let registry = MemoryRegistry::new();
        let amd = Digest::sha256_of(b"amd");
        let files = vec![digest_file("app", "amd64", &amd)];

        let mut pushed = BTreeMap::new();
        pushed.insert(
            "org.opencontainers.image.version".to_string(),
            "1.0".to_string(),
        );
        push_annotated_list(&registry, &[&amd], pushed.clone());

        // Same digests, no annotations requested
        assert!(!check_manifest_exists(&registry, &files, &existence()).await.unwrap());

        let mut opts = existence();
        opts.annotations = pushed;
        assert!(check_manifest_exists(&registry, &files, &opts).await.unwrap());

        opts.annotations.insert(
            "org.opencontainers.image.version".to_string(),
            "2.0".to_string(),
        );
        assert!(!check_manifest_exists(&registry, &files, &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_single_arch_target_is_not_up_to_date() {
        let registry = MemoryRegistry::new();
        let digest = registry.put_image(
            "reg.local/test/app",
            Some("v1"),
            &PlatformInfo::new("linux", "amd64", ""),
            "x",
        );
        let files = vec![digest_file("app", "amd64", &digest)];
        assert!(!check_manifest_exists(&registry, &files, &existence()).await.unwrap());
    }
}
