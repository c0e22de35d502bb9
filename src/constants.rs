/// Architecture tokens used in digest file names
pub mod arch {
    /// Known architecture suffixes, in match order
    pub const KNOWN: [&str; 9] = [
        "amd64", "arm64", "arm-v7", "arm-v6", "arm-v8", "ppc64le", "s390x", "386", "riscv64",
    ];
}

/// Platform constants for container images
pub mod platform {
    /// OS assumed when a platform string omits it
    pub const DEFAULT_OS: &str = "linux";
}

/// Container image tag constants
pub mod tag {
    /// Default container image tag
    pub const DEFAULT: &str = "latest";
}

/// Manifest media types
pub mod media_type {
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

    /// Media types accepted when fetching a manifest
    pub const ACCEPTED: [&str; 4] = [
        OCI_INDEX,
        DOCKER_MANIFEST_LIST,
        OCI_MANIFEST,
        DOCKER_MANIFEST,
    ];
}

/// Registry verification limits
pub mod verify {
    /// Concurrency used when none (or a non-positive value) is requested
    pub const DEFAULT_CONCURRENCY: i64 = 5;

    /// Upper bound on simultaneous registry requests
    pub const MAX_CONCURRENCY: i64 = 20;
}

/// Digest file naming
pub mod digest_file {
    pub const PREFIX: &str = "digest-";
    pub const SUFFIX: &str = ".txt";
}
