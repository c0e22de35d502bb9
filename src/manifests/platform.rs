//! Platform strings of the form `os/architecture[/variant]`.

use crate::constants::platform::DEFAULT_OS;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A parsed target platform such as `linux/arm64/v8`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PlatformInfo {
    pub os: String,
    pub architecture: String,
    /// Empty when the platform has no variant
    pub variant: String,
}

impl PlatformInfo {
    pub fn new(os: &str, architecture: &str, variant: &str) -> Self {
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            variant: variant.to_string(),
        }
    }

    /// Map a digest-file architecture token (`amd64`, `arm-v7`) to a platform.
    ///
    /// Variant-qualified tokens use a dash in file names because `/` cannot
    /// appear there, so `arm-v7` becomes `linux/arm/v7`.
    pub fn from_arch_token(token: &str) -> Self {
        match token.split_once("-v") {
            Some((arch, rev)) if !arch.is_empty() && !rev.is_empty() => {
                Self::new(DEFAULT_OS, arch, &format!("v{}", rev))
            }
            _ => parse_platform(token),
        }
    }
}

/// Parse a platform string, defaulting the OS to `linux`.
///
/// Accepts `os/arch/variant`, `os/arch`, `arch/variant` and `arch`. Never
/// fails: malformed input degrades to a best-effort assignment of fields.
pub fn parse_platform(s: &str) -> PlatformInfo {
    let mut info = PlatformInfo {
        os: DEFAULT_OS.to_string(),
        ..Default::default()
    };

    let parts: Vec<&str> = s.split('/').collect();
    match parts.as_slice() {
        [arch] => info.architecture = arch.to_string(),
        [first, second] => {
            if is_likely_os(first) {
                info.os = first.to_string();
                info.architecture = second.to_string();
            } else {
                info.architecture = first.to_string();
                info.variant = second.to_string();
            }
        }
        [os, arch, variant, ..] => {
            info.os = os.to_string();
            info.architecture = arch.to_string();
            info.variant = variant.to_string();
        }
        [] => {}
    }

    info
}

/// Render a platform as `os/arch`, or `os/arch/variant` when a variant is set
pub fn format_platform(info: &PlatformInfo) -> String {
    if info.variant.is_empty() {
        format!("{}/{}", info.os, info.architecture)
    } else {
        format!("{}/{}/{}", info.os, info.architecture, info.variant)
    }
}

/// Whether a path segment names an operating system rather than an architecture
pub fn is_likely_os(token: &str) -> bool {
    matches!(
        token.to_ascii_lowercase().as_str(),
        "linux"
            | "windows"
            | "darwin"
            | "freebsd"
            | "openbsd"
            | "netbsd"
            | "solaris"
            | "aix"
            | "plan9"
            | "js"
    )
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_platform(self))
    }
}

impl FromStr for PlatformInfo {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(parse_platform(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::arch::KNOWN;

    #[test]
    fn test_parse_three_parts() {
        let p = parse_platform("linux/arm64/v8");
        assert_eq!(p, PlatformInfo::new("linux", "arm64", "v8"));
    }

    #[test]
    fn test_parse_os_arch() {
        let p = parse_platform("windows/amd64");
        assert_eq!(p, PlatformInfo::new("windows", "amd64", ""));
    }

    #[test]
    fn test_parse_os_is_case_insensitive() {
        let p = parse_platform("Darwin/arm64");
        assert_eq!(p.os, "Darwin");
        assert_eq!(p.architecture, "arm64");
        assert!(p.variant.is_empty());
    }

    #[test]
    fn test_parse_arch_variant() {
        let p = parse_platform("arm/v7");
        assert_eq!(p, PlatformInfo::new("linux", "arm", "v7"));
    }

    #[test]
    fn test_parse_arch_only() {
        let p = parse_platform("amd64");
        assert_eq!(p, PlatformInfo::new("linux", "amd64", ""));
    }

    #[test]
    fn test_parse_degenerate_input_does_not_panic() {
        assert_eq!(parse_platform("").architecture, "");
        assert_eq!(parse_platform("/").architecture, "");
        let p = parse_platform("linux/arm/v7/extra");
        assert_eq!(p, PlatformInfo::new("linux", "arm", "v7"));
    }

    #[test]
    fn test_known_architectures_round_trip() {
        for arch in KNOWN {
            let s = format!("linux/{}", arch);
            let p = parse_platform(&s);
            assert_eq!(p, PlatformInfo::new("linux", arch, ""));
            assert_eq!(format_platform(&p), s);
        }
    }

    #[test]
    fn test_format_is_idempotent_from_canonical_form() {
        let s = "linux/arm64/v8";
        let once = format_platform(&parse_platform(s));
        let twice = format_platform(&parse_platform(&once));
        assert_eq!(once, s);
        assert_eq!(twice, s);
    }

    #[test]
    fn test_abbreviated_forms_expand() {
        assert_eq!(parse_platform("amd64").to_string(), "linux/amd64");
        assert_eq!(parse_platform("arm/v6").to_string(), "linux/arm/v6");
    }

    #[test]
    fn test_from_arch_token() {
        assert_eq!(
            PlatformInfo::from_arch_token("arm-v7"),
            PlatformInfo::new("linux", "arm", "v7")
        );
        assert_eq!(
            PlatformInfo::from_arch_token("arm-v8"),
            PlatformInfo::new("linux", "arm", "v8")
        );
        assert_eq!(
            PlatformInfo::from_arch_token("ppc64le"),
            PlatformInfo::new("linux", "ppc64le", "")
        );
    }

    #[test]
    fn test_is_likely_os() {
        assert!(is_likely_os("linux"));
        assert!(is_likely_os("WINDOWS"));
        assert!(is_likely_os("plan9"));
        assert!(!is_likely_os("arm"));
        assert!(!is_likely_os("amd64"));
    }
}
