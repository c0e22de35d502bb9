use super::digest::Digest;

/// Components of a per-architecture image reference
#[derive(Debug, Clone, Default)]
pub struct ReferenceOptions {
    pub registry: String,
    pub namespace: String,
    pub image_name: String,
    pub architecture: String,
    pub tag: String,
}

fn repository_prefix(registry: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        registry.to_string()
    } else {
        format!("{}/{}", registry, namespace)
    }
}

/// `registry[/namespace]/{image}-{arch}:{tag}`
pub fn build_image_reference(opts: &ReferenceOptions) -> String {
    format!(
        "{}/{}-{}:{}",
        repository_prefix(&opts.registry, &opts.namespace),
        opts.image_name,
        opts.architecture,
        opts.tag
    )
}

/// `registry[/namespace]/{image}:{tag}`, the multi-arch reference.
///
/// An empty tag leaves a trailing `:` for callers that append a digest.
pub fn build_manifest_reference(
    registry: &str,
    namespace: &str,
    image_name: &str,
    tag: &str,
) -> String {
    format!(
        "{}/{}:{}",
        repository_prefix(registry, namespace),
        image_name,
        tag
    )
}

/// `registry[/namespace]/{image}@{digest}`
pub fn build_digest_reference(
    registry: &str,
    namespace: &str,
    image_name: &str,
    digest: &Digest,
) -> String {
    let base = build_manifest_reference(registry, namespace, image_name, "");
    format!("{}@{}", base.trim_end_matches(':'), digest)
}

/// `registry[/namespace]/{image}` without tag or digest
pub fn build_repository_reference(registry: &str, namespace: &str, image_name: &str) -> String {
    format!("{}/{}", repository_prefix(registry, namespace), image_name)
}
