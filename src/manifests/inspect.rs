use super::reference::{build_manifest_reference, build_repository_reference};
use crate::constants::media_type;
use crate::manifest::{ImageIndex, ImageManifest};
use crate::registry::RegistryBackend;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    pub registry: String,
    pub namespace: String,
    pub image_name: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub registry: String,
    pub namespace: String,
    pub image_name: String,
}

/// What a manifest reference resolves to
#[derive(Debug, Clone, Default)]
pub struct ManifestInfo {
    pub name: String,
    pub tag: String,
    pub digest: String,
    pub media_type: String,
    pub size: i64,
    pub annotations: BTreeMap<String, String>,
    pub architectures: Vec<ArchitectureInfo>,
}

impl ManifestInfo {
    pub fn is_multi_arch(&self) -> bool {
        is_multi_arch_media_type(&self.media_type)
    }
}

/// One platform entry of a manifest. Platform fields are empty when the
/// registry did not record them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchitectureInfo {
    pub os: String,
    pub architecture: String,
    pub variant: String,
    pub digest: String,
    pub size: i64,
    pub media_type: String,
}

/// OCI image indexes and Docker manifest lists are multi-arch; single image
/// manifests of either flavour are not.
pub fn is_multi_arch_media_type(media_type: &str) -> bool {
    media_type == media_type::OCI_INDEX || media_type == media_type::DOCKER_MANIFEST_LIST
}

/// Fetch and describe the manifest at `registry[/namespace]/image:tag`
pub async fn inspect_manifest(
    backend: &dyn RegistryBackend,
    opts: &InspectOptions,
) -> Result<ManifestInfo> {
    let reference =
        build_manifest_reference(&opts.registry, &opts.namespace, &opts.image_name, &opts.tag);
    debug!("Inspecting manifest {}", reference);

    let descriptor = backend
        .fetch_descriptor(&reference)
        .await
        .with_context(|| format!("Failed to get manifest descriptor for {}", reference))?;

    let mut info = ManifestInfo {
        name: opts.image_name.clone(),
        tag: opts.tag.clone(),
        digest: descriptor.digest.clone(),
        media_type: descriptor.media_type.clone(),
        size: descriptor.size,
        ..Default::default()
    };

    if is_multi_arch_media_type(&descriptor.media_type) {
        let index: ImageIndex = serde_json::from_slice(&descriptor.data)
            .with_context(|| format!("Failed to parse manifest list for {}", reference))?;

        info.architectures = index
            .manifests
            .into_iter()
            .map(|m| {
                let (os, architecture, variant) = match m.platform {
                    Some(p) => (p.os, p.architecture, p.variant.unwrap_or_default()),
                    None => Default::default(),
                };
                ArchitectureInfo {
                    os,
                    architecture,
                    variant,
                    digest: m.digest,
                    size: m.size,
                    media_type: m.media_type,
                }
            })
            .collect();
        info.annotations = index.annotations.unwrap_or_default();
    } else {
        let manifest: ImageManifest = serde_json::from_slice(&descriptor.data)
            .with_context(|| format!("Failed to parse image manifest for {}", reference))?;

        info.architectures = vec![ArchitectureInfo {
            digest: descriptor.digest,
            size: descriptor.size,
            media_type: descriptor.media_type,
            ..Default::default()
        }];
        info.annotations = manifest.annotations.unwrap_or_default();
    }

    Ok(info)
}

/// All tags of `registry[/namespace]/image`
pub async fn list_tags(backend: &dyn RegistryBackend, opts: &ListOptions) -> Result<Vec<String>> {
    let repository = build_repository_reference(&opts.registry, &opts.namespace, &opts.image_name);
    debug!("Listing tags for {}", repository);

    backend
        .list_tags(&repository)
        .await
        .with_context(|| format!("Failed to list tags for {}", repository))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifests::platform::PlatformInfo;
    use crate::registry::MemoryRegistry;

    fn inspect_opts(tag: &str) -> InspectOptions {
        InspectOptions {
            registry: "reg.local".to_string(),
            namespace: "test".to_string(),
            image_name: "app".to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn test_multi_arch_media_types() {
        assert!(is_multi_arch_media_type(media_type::OCI_INDEX));
        assert!(is_multi_arch_media_type(media_type::DOCKER_MANIFEST_LIST));
        assert!(!is_multi_arch_media_type(media_type::OCI_MANIFEST));
        assert!(!is_multi_arch_media_type(media_type::DOCKER_MANIFEST));
        assert!(!is_multi_arch_media_type(""));
    }

    #[tokio::test]
    async fn test_inspect_index_without_platform() {
        let registry = MemoryRegistry::new();
        let child = format!("sha256:{}", "c".repeat(64));
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::DOCKER_MANIFEST_LIST,
            "manifests": [
                {"mediaType": media_type::DOCKER_MANIFEST, "digest": child, "size": 42}
            ],
            "annotations": {"org.opencontainers.image.version": "1.2.3"}
        });
        registry.put_manifest(
            "reg.local/test/app",
            Some("v1"),
            index.to_string().into_bytes(),
        );

        let info = inspect_manifest(&registry, &inspect_opts("v1"))
            .await
            .unwrap();
        assert!(info.is_multi_arch());
        assert_eq!(info.architectures.len(), 1);

        let arch = &info.architectures[0];
        assert_eq!(arch.digest, child);
        assert_eq!(arch.size, 42);
        assert!(arch.os.is_empty());
        assert!(arch.architecture.is_empty());
        assert_eq!(
            info.annotations["org.opencontainers.image.version"],
            "1.2.3"
        );
    }

    #[tokio::test]
    async fn test_inspect_single_arch_manifest() {
        let registry = MemoryRegistry::new();
        let platform = PlatformInfo::new("linux", "amd64", "");
        let digest =
            registry.put_image("reg.local/test/app", Some("solo"), &platform, "s");

        let info = inspect_manifest(&registry, &inspect_opts("solo"))
            .await
            .unwrap();
        assert!(!info.is_multi_arch());
        assert_eq!(info.digest, digest.to_string());
        assert_eq!(info.architectures.len(), 1);
        assert_eq!(info.architectures[0].digest, digest.to_string());
        assert_eq!(info.architectures[0].size, info.size);
        assert!(info.architectures[0].os.is_empty());
    }

    #[tokio::test]
    async fn test_inspect_missing_names_reference() {
        let registry = MemoryRegistry::new();
        let err = inspect_manifest(&registry, &inspect_opts("nope"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reg.local/test/app:nope"));
    }

    #[tokio::test]
    async fn test_list_tags() {
        let registry = MemoryRegistry::new();
        let platform = PlatformInfo::new("linux", "amd64", "");
        registry.put_image("reg.local/test/app", Some("v1"), &platform, "1");
        registry.put_image("reg.local/test/app", Some("latest"), &platform, "2");

        let tags = list_tags(
            &registry,
            &ListOptions {
                registry: "reg.local".to_string(),
                namespace: "test".to_string(),
                image_name: "app".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(tags, vec!["latest".to_string(), "v1".to_string()]);
    }
}
