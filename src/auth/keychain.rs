//! Keychain implementation for credential management

use super::{Anonymous, AuthConfig, Authenticator, Basic, DockerAuthEntry, DockerConfig};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Trait for types that can resolve authentication for a given resource
pub trait Keychain: Send + Sync {
    /// Resolve authentication for a given resource (registry host or image reference)
    fn resolve(&self, resource: &str) -> Result<Box<dyn Authenticator>>;
}

/// Keychain backed by Docker-style config files and credential helpers
pub struct DefaultKeychain {
    /// Explicit auth file, checked before the standard locations
    auth_file: Option<PathBuf>,
    config: OnceLock<DockerConfig>,
}

impl DefaultKeychain {
    pub fn new() -> Self {
        Self {
            auth_file: None,
            config: OnceLock::new(),
        }
    }

    /// Use `path` ahead of the standard config locations
    pub fn with_auth_file(path: impl Into<PathBuf>) -> Self {
        Self {
            auth_file: Some(path.into()),
            config: OnceLock::new(),
        }
    }

    /// Candidate config files, most specific first
    fn config_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(auth_file) = &self.auth_file {
            paths.push(auth_file.clone());
        }

        if let Ok(docker_config) = std::env::var("DOCKER_CONFIG") {
            paths.push(PathBuf::from(docker_config).join("config.json"));
        }

        if let Ok(auth_file) = std::env::var("REGISTRY_AUTH_FILE") {
            paths.push(PathBuf::from(auth_file));
        }

        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            paths.push(PathBuf::from(xdg_runtime).join("containers/auth.json"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".docker/config.json"));
        }

        paths
    }

    /// First config file that parses, or an empty config
    fn load_config(&self) -> &DockerConfig {
        self.config.get_or_init(|| {
            for path in self.config_paths() {
                if !path.exists() {
                    continue;
                }
                debug!("Checking Docker config at: {}", path.display());
                let parsed = std::fs::read_to_string(&path)
                    .context("read failed")
                    .and_then(|content| {
                        serde_json::from_str::<DockerConfig>(&content).context("parse failed")
                    });
                match parsed {
                    Ok(config) => {
                        debug!("Loaded Docker config from: {}", path.display());
                        return config;
                    }
                    Err(e) => warn!("Ignoring Docker config at {}: {:#}", path.display(), e),
                }
            }
            DockerConfig::default()
        })
    }

    /// Extract the registry host from an image reference
    fn extract_registry(image_ref: &str) -> &str {
        // - ghcr.io/org/image:tag -> ghcr.io
        // - localhost:5000/image -> localhost:5000
        // - ubuntu:latest -> index.docker.io (implicit)
        if let Some((first, _)) = image_ref.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                return first;
            }
            return "index.docker.io";
        }

        // A bare host, as passed by health checks
        if Self::looks_like_host(image_ref) {
            return image_ref;
        }

        "index.docker.io"
    }

    /// `quay.io`, `localhost` or `myhost:5000`, but not `ubuntu:latest`
    fn looks_like_host(s: &str) -> bool {
        if s.contains('.') || s == "localhost" {
            return true;
        }
        match s.rsplit_once(':') {
            Some((_, port)) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
            None => false,
        }
    }

    /// Spellings of a registry that may appear as keys in `auths`
    fn normalize_registry(registry: &str) -> Vec<String> {
        let mut variants = vec![registry.to_string()];

        if registry == "docker.io" || registry == "index.docker.io" {
            variants.push("docker.io".to_string());
            variants.push("index.docker.io".to_string());
            variants.push("https://index.docker.io/v1/".to_string());
            variants.push("https://index.docker.io/v2/".to_string());
        } else if !registry.starts_with("http://") && !registry.starts_with("https://") {
            variants.push(format!("https://{}", registry));
            variants.push(format!("http://{}", registry));
            variants.push(format!("https://{}/v1/", registry));
            variants.push(format!("https://{}/v2/", registry));
        }

        variants
    }

    fn find_auth_entry<'a>(
        config: &'a DockerConfig,
        registry: &str,
    ) -> Option<&'a DockerAuthEntry> {
        Self::normalize_registry(registry)
            .iter()
            .find_map(|variant| config.auths.get(variant))
    }

    fn credential_helper<'a>(config: &'a DockerConfig, registry: &str) -> Option<&'a str> {
        config
            .cred_helpers
            .get(registry)
            .or(config.creds_store.as_ref())
            .map(String::as_str)
    }

    /// Run `docker-credential-<helper> get` for `registry`
    fn execute_credential_helper(helper: &str, registry: &str) -> Result<AuthConfig> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        let helper_name = format!("docker-credential-{}", helper);
        let helper_path = which::which(&helper_name)
            .with_context(|| format!("Credential helper {} not found in PATH", helper_name))?;

        debug!(
            "Executing credential helper: {} for {}",
            helper_name, registry
        );

        let mut child = Command::new(&helper_path)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn credential helper: {}", helper_name))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(registry.as_bytes())?;
            stdin.write_all(b"\n")?;
        }

        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Credential helper {} failed: {}",
                helper_name,
                stderr.trim()
            );
        }

        #[derive(serde::Deserialize)]
        struct HelperResponse {
            #[serde(rename = "Username")]
            username: Option<String>,
            #[serde(rename = "Secret")]
            secret: Option<String>,
        }

        let response: HelperResponse = serde_json::from_slice(&output.stdout)
            .context("Failed to parse credential helper response")?;

        Ok(AuthConfig {
            username: response.username,
            password: response.secret,
            ..Default::default()
        })
    }
}

impl Default for DefaultKeychain {
    fn default() -> Self {
        Self::new()
    }
}

impl Keychain for DefaultKeychain {
    fn resolve(&self, resource: &str) -> Result<Box<dyn Authenticator>> {
        let config = self.load_config();
        let registry = Self::extract_registry(resource);

        debug!(
            "Resolving auth for resource: {} (registry: {})",
            resource, registry
        );

        if let Some(entry) = Self::find_auth_entry(config, registry) {
            let auth_config = entry.to_auth_config();
            if auth_config.is_anonymous() {
                return Ok(Box::new(Anonymous));
            }
            return Ok(Box::new(ConfigAuthenticator {
                config: auth_config,
            }));
        }

        if let Some(helper) = Self::credential_helper(config, registry) {
            match Self::execute_credential_helper(helper, registry) {
                Ok(auth_config) => {
                    return Ok(Box::new(ConfigAuthenticator {
                        config: auth_config,
                    }))
                }
                Err(e) => warn!("Credential helper failed: {:#}", e),
            }
        }

        debug!("No credentials found for {}, using anonymous", registry);
        Ok(Box::new(Anonymous))
    }
}

/// Keychain reading `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`
pub struct EnvKeychain;

impl Keychain for EnvKeychain {
    fn resolve(&self, _resource: &str) -> Result<Box<dyn Authenticator>> {
        match (
            std::env::var("REGISTRY_USERNAME"),
            std::env::var("REGISTRY_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) if !username.is_empty() && !password.is_empty() => {
                Ok(Box::new(Basic::new(username, password)))
            }
            _ => Ok(Box::new(Anonymous)),
        }
    }
}

/// Authenticator that returns a fixed AuthConfig
struct ConfigAuthenticator {
    config: AuthConfig,
}

impl Authenticator for ConfigAuthenticator {
    fn authorization(&self) -> Result<AuthConfig> {
        Ok(self.config.clone())
    }
}

/// Multi-keychain that tries multiple keychains in order
pub struct MultiKeychain {
    keychains: Vec<Box<dyn Keychain>>,
}

impl MultiKeychain {
    pub fn new(keychains: Vec<Box<dyn Keychain>>) -> Self {
        Self { keychains }
    }

    /// Environment credentials first, then config files and helpers
    pub fn standard(auth_file: Option<PathBuf>) -> Self {
        let files = match auth_file {
            Some(path) => DefaultKeychain::with_auth_file(path),
            None => DefaultKeychain::new(),
        };
        Self::new(vec![Box::new(EnvKeychain), Box::new(files)])
    }
}

impl Keychain for MultiKeychain {
    fn resolve(&self, resource: &str) -> Result<Box<dyn Authenticator>> {
        for keychain in &self.keychains {
            match keychain.resolve(resource) {
                Ok(auth) => {
                    if let Ok(config) = auth.authorization() {
                        if !config.is_anonymous() {
                            return Ok(auth);
                        }
                    }
                }
                Err(e) => debug!("Keychain failed: {}", e),
            }
        }

        Ok(Box::new(Anonymous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_registry() {
        assert_eq!(
            DefaultKeychain::extract_registry("docker.io/library/ubuntu:latest"),
            "docker.io"
        );
        assert_eq!(
            DefaultKeychain::extract_registry("ghcr.io/org/image@sha256:abc"),
            "ghcr.io"
        );
        assert_eq!(
            DefaultKeychain::extract_registry("localhost:5000/image"),
            "localhost:5000"
        );
        assert_eq!(
            DefaultKeychain::extract_registry("localhost/image"),
            "localhost"
        );
        assert_eq!(DefaultKeychain::extract_registry("quay.io"), "quay.io");
        assert_eq!(
            DefaultKeychain::extract_registry("localhost"),
            "localhost"
        );
        assert_eq!(
            DefaultKeychain::extract_registry("myhost:5000"),
            "myhost:5000"
        );
        assert_eq!(
            DefaultKeychain::extract_registry("ubuntu"),
            "index.docker.io"
        );
        assert_eq!(
            DefaultKeychain::extract_registry("ubuntu:latest"),
            "index.docker.io"
        );
        assert_eq!(
            DefaultKeychain::extract_registry("user/image:tag"),
            "index.docker.io"
        );
    }

    #[test]
    fn test_normalize_registry() {
        let variants = DefaultKeychain::normalize_registry("docker.io");
        assert!(variants.contains(&"index.docker.io".to_string()));

        let variants = DefaultKeychain::normalize_registry("gcr.io");
        assert!(variants.contains(&"https://gcr.io".to_string()));
    }

    #[test]
    fn test_auth_file_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            r#"{"auths": {"registry.example.com": {"username": "ci", "password": "s3cret"}}}"#,
        )
        .unwrap();

        let keychain = DefaultKeychain::with_auth_file(&path);
        let config = keychain
            .resolve("registry.example.com/team/app:latest")
            .unwrap()
            .authorization()
            .unwrap();
        assert_eq!(config.username.as_deref(), Some("ci"));
        assert_eq!(config.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_multi_keychain_skips_anonymous() {
        struct Fixed(Option<(&'static str, &'static str)>);
        impl Keychain for Fixed {
            fn resolve(&self, _resource: &str) -> Result<Box<dyn Authenticator>> {
                Ok(match self.0 {
                    Some((u, p)) => Box::new(Basic::new(u.to_string(), p.to_string())),
                    None => Box::new(Anonymous),
                })
            }
        }

        let chain = MultiKeychain::new(vec![
            Box::new(Fixed(None)),
            Box::new(Fixed(Some(("bot", "pw")))),
        ]);
        let config = chain.resolve("ghcr.io/x/y").unwrap().authorization().unwrap();
        assert_eq!(config.username.as_deref(), Some("bot"));
    }
}
