//! Multi-architecture manifest assembly and digest verification

pub mod create;
pub mod digest;
pub mod error;
pub mod inspect;
pub mod platform;
pub mod reference;
pub mod store;
pub mod validator;
pub mod verify;

pub use create::{
    assemble, build_index, collect_digest_files, create_and_push_manifest, manifest_entries,
    merge_annotations, Assembly, AssemblyOptions, CreationOptions, ManifestEntry,
};
pub use digest::Digest;
pub use error::ManifestError;
pub use inspect::{
    inspect_manifest, is_multi_arch_media_type, list_tags, ArchitectureInfo, InspectOptions,
    ListOptions, ManifestInfo,
};
pub use platform::{format_platform, is_likely_os, parse_platform, PlatformInfo};
pub use reference::{
    build_digest_reference, build_image_reference, build_manifest_reference,
    build_repository_reference, ReferenceOptions,
};
pub use store::{
    discover_digest_files, parse_digest_file, save_digest_to_file, DigestFile, DiscoveryOptions,
};
pub use validator::{
    filter_architectures, validate_digest_files, FilterOptions, ValidationOptions,
};
pub use verify::{
    check_manifest_exists, effective_concurrency, health_check_registry,
    verify_digests_in_registry, ExistenceOptions, VerificationOptions,
};
