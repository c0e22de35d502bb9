//! In-process registry backend
//!
//! Stores manifests by digest with a tag map per repository. Used for
//! offline runs and as the test registry for manifest assembly.

use super::{Descriptor, RegistryBackend, RegistryError};
use crate::constants::{media_type, tag};
use crate::manifest::ImageIndex;
use crate::manifests::digest::Digest;
use crate::manifests::platform::PlatformInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Repository {
    /// digest -> raw manifest bytes
    manifests: HashMap<String, Vec<u8>>,
    /// tag -> digest
    tags: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct MemoryRegistry {
    repositories: Mutex<HashMap<String, Repository>>,
    requests: AtomicUsize,
}

/// Where a reference points inside a repository
enum Target {
    Tag(String),
    Digest(String),
}

/// Split `host/path/name[:tag|@digest]` into repository and target
fn split_reference(reference: &str) -> (String, Target) {
    if let Some((repo, digest)) = reference.split_once('@') {
        return (repo.to_string(), Target::Digest(digest.to_string()));
    }

    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (
                reference[..split].to_string(),
                Target::Tag(reference[split + 1..].to_string()),
            )
        }
        None => (reference.to_string(), Target::Tag(tag::DEFAULT.to_string())),
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backend calls served so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Repository>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        // A panic while holding the lock cannot leave a repository half-written
        self.repositories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store raw manifest bytes in `repository`, optionally tagging them
    pub fn put_manifest(&self, repository: &str, tag: Option<&str>, data: Vec<u8>) -> Digest {
        let digest = Digest::sha256_of(&data);
        let mut repos = self
            .repositories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let repo = repos.entry(repository.to_string()).or_default();
        repo.manifests.insert(digest.to_string(), data);
        if let Some(tag) = tag {
            repo.tags.insert(tag.to_string(), digest.to_string());
        }
        digest
    }

    /// Store a minimal single-arch image manifest for `platform`.
    ///
    /// `seed` makes the config digest, and therefore the manifest digest,
    /// unique per call site.
    pub fn put_image(
        &self,
        repository: &str,
        tag: Option<&str>,
        platform: &PlatformInfo,
        seed: &str,
    ) -> Digest {
        let config = serde_json::json!({
            "architecture": platform.architecture,
            "os": platform.os,
            "variant": platform.variant,
            "seed": seed,
        })
        .to_string();
        let config_digest = Digest::sha256_of(config.as_bytes());

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_MANIFEST,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest.to_string(),
                "size": config.len(),
            },
            "layers": [],
        });

        self.put_manifest(repository, tag, manifest.to_string().into_bytes())
    }
}

#[async_trait]
impl RegistryBackend for MemoryRegistry {
    async fn fetch_descriptor(&self, reference: &str) -> Result<Descriptor> {
        let (repository, target) = split_reference(reference);
        let repos = self.lock();

        let found = repos.get(&repository).and_then(|repo| {
            let digest = match &target {
                Target::Digest(d) => d.clone(),
                Target::Tag(t) => repo.tags.get(t)?.clone(),
            };
            repo.manifests.get(&digest).cloned()
        });

        match found {
            Some(data) => Ok(Descriptor::from_bytes(data)),
            None => Err(RegistryError::NotFound {
                reference: reference.to_string(),
            }
            .into()),
        }
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let repos = self.lock();
        let repo = repos
            .get(repository)
            .with_context(|| format!("repository {} not found", repository))?;
        Ok(repo.tags.keys().cloned().collect())
    }

    async fn push_index(&self, reference: &str, index: &ImageIndex) -> Result<String> {
        let (repository, target) = split_reference(reference);
        let tag = match target {
            Target::Tag(t) => t,
            Target::Digest(d) => anyhow::bail!("cannot push an index by digest ({})", d),
        };
        let data = serde_json::to_vec(index).context("Failed to serialize image index")?;
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.put_manifest(&repository, Some(&tag), data).to_string())
    }
}
