use crate::auth::{resolve_registry_auth, Keychain};
use crate::constants::{media_type, tag};
use crate::manifest::{media_type_of, ImageIndex};
use crate::manifests::digest::Digest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::{ImageIndexEntry, OciImageIndex};
use oci_distribution::{Client, Reference};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

mod memory;

pub use memory::MemoryRegistry;


/// A manifest as fetched from a registry
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    /// Raw manifest bytes, exactly as served
    pub data: Vec<u8>,
}

impl Descriptor {
    /// Describe raw manifest bytes, computing digest and size locally
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            media_type: media_type_of(&data),
            digest: Digest::sha256_of(&data).to_string(),
            size: data.len() as i64,
            data,
        }
    }
}

/// Registry failures callers branch on
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("manifest not found: {reference}")]
    NotFound { reference: String },
}

/// Returns true when `err` (or its cause chain) is a missing manifest
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| matches!(e.downcast_ref::<RegistryError>(), Some(RegistryError::NotFound { .. })))
}

/// The registry operations manifest assembly needs
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Fetch the manifest or index behind `reference` (tag or digest form)
    async fn fetch_descriptor(&self, reference: &str) -> Result<Descriptor>;

    /// List tags of the repository named by `repository` (`host/path/name`)
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Push `index` to `reference` and return the digest of the stored index
    async fn push_index(&self, reference: &str, index: &ImageIndex) -> Result<String>;
}

/// Registry backend speaking the distribution API through oci-distribution
pub struct RegistryClient {
    client: Client,
    keychain: Arc<dyn Keychain>,
}

impl RegistryClient {
    /// Create a client. Registries in `insecure` (plus `localhost`) use plain HTTP.
    pub fn new(keychain: Arc<dyn Keychain>, insecure: &[String]) -> Self {
        let mut plain_http = vec!["localhost".to_string()];
        plain_http.extend(insecure.iter().cloned());

        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(plain_http),
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            keychain,
        }
    }

    fn parse(reference: &str) -> Result<Reference> {
        reference
            .parse()
            .with_context(|| format!("Failed to parse image reference: {}", reference))
    }

    fn not_found_or(reference: &str, err: OciDistributionError, action: &str) -> anyhow::Error {
        if manifest_missing(&err) {
            RegistryError::NotFound {
                reference: reference.to_string(),
            }
            .into()
        } else {
            anyhow::Error::new(err).context(format!("Failed to {} {}", action, reference))
        }
    }
}

fn manifest_missing(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        OciDistributionError::RegistryError { envelope, .. } => envelope
            .errors
            .iter()
            .any(|e| matches!(e.code, OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown)),
        _ => false,
    }
}

/// Convert our index into the oci-distribution representation
fn to_oci_index(index: &ImageIndex) -> OciImageIndex {
    let manifests = index
        .manifests
        .iter()
        .map(|m| ImageIndexEntry {
            media_type: m.media_type.clone(),
            digest: m.digest.clone(),
            size: m.size,
            platform: m.platform.as_ref().map(|p| oci_distribution::manifest::Platform {
                architecture: p.architecture.clone(),
                os: p.os.clone(),
                os_version: None,
                os_features: None,
                variant: p.variant.clone(),
                features: None,
            }),
            annotations: None,
        })
        .collect();

    OciImageIndex {
        schema_version: 2,
        media_type: index.media_type.clone(),
        manifests,
        annotations: index
            .annotations
            .as_ref()
            .map(|a| a.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    }
}

#[async_trait]
impl RegistryBackend for RegistryClient {
    async fn fetch_descriptor(&self, reference: &str) -> Result<Descriptor> {
        let parsed = Self::parse(reference)?;
        let auth = resolve_registry_auth(self.keychain.as_ref(), reference);

        debug!("Fetching manifest {}", reference);
        let (data, digest) = self
            .client
            .pull_manifest_raw(&parsed, &auth, &media_type::ACCEPTED)
            .await
            .map_err(|e| Self::not_found_or(reference, e, "fetch manifest"))?;

        let data = data.to_vec();
        Ok(Descriptor {
            media_type: media_type_of(&data),
            size: data.len() as i64,
            digest,
            data,
        })
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let parsed = Self::parse(repository)?;
        let auth = resolve_registry_auth(self.keychain.as_ref(), repository);

        debug!("Listing tags for {}", repository);
        let response = self
            .client
            .list_tags(&parsed, &auth, None, None)
            .await
            .with_context(|| format!("Failed to list tags for {}", repository))?;

        Ok(response.tags)
    }

    async fn push_index(&self, reference: &str, index: &ImageIndex) -> Result<String> {
        let parsed = Self::parse(reference)?;
        let auth = resolve_registry_auth(self.keychain.as_ref(), reference);

        debug!(
            "Pushing manifest list with {} manifests to {}",
            index.manifests.len(),
            reference
        );
        for m in &index.manifests {
            if let Some(p) = &m.platform {
                debug!(
                    "  - Platform: {}/{}, digest: {}",
                    p.os, p.architecture, m.digest
                );
            }
        }

        let manifest_url = self
            .client
            .push_manifest_list(&parsed, &auth, to_oci_index(index))
            .await
            .with_context(|| format!("Failed to push manifest list to {}", reference))?;

        info!("Successfully pushed manifest list to {}", manifest_url);

        // The registry is authoritative for the digest of what it stored
        self.client
            .fetch_manifest_digest(&parsed, &auth)
            .await
            .with_context(|| format!("Failed to resolve digest of {}", reference))
    }
}

/// Split an image reference into (registry, repository, tag)
pub fn parse_image_reference(image: &str) -> Result<(String, String, String)> {
    let reference: Reference = image.parse().context("Failed to parse image reference")?;

    let registry = reference.registry().to_string();
    let repository = reference.repository().to_string();
    let tag = reference.tag().unwrap_or(tag::DEFAULT).to_string();

    Ok((registry, repository, tag))
}
