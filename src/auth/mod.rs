//! Registry credentials
//!
//! Credentials are resolved per reference at call time from Docker-style
//! config files, credential helpers, or `REGISTRY_USERNAME` /
//! `REGISTRY_PASSWORD`, the same sources `docker login` and podman use.

use anyhow::Result;
use base64::Engine;
use oci_distribution::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

mod keychain;

pub use keychain::{DefaultKeychain, EnvKeychain, Keychain, MultiKeychain};

/// Authentication configuration containing credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
}

impl AuthConfig {
    /// Create a new AuthConfig with username and password
    pub fn new(username: String, password: String) -> Self {
        Self {
            username: Some(username),
            password: Some(password),
            ..Default::default()
        }
    }

    /// Create an anonymous AuthConfig
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Check if this is anonymous authentication
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.auth.is_none()
            && self.identity_token.is_none()
    }

    /// Convert to oci-distribution RegistryAuth
    pub fn to_registry_auth(&self) -> RegistryAuth {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return RegistryAuth::Basic(username.clone(), password.clone());
        }

        if let Some(auth) = &self.auth {
            // `auth` is base64("user:pass")
            if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(auth) {
                if let Ok(decoded_str) = String::from_utf8(decoded) {
                    if let Some((user, pass)) = decoded_str.split_once(':') {
                        return RegistryAuth::Basic(user.to_string(), pass.to_string());
                    }
                }
            }
        }

        // Identity tokens are exchanged as the password of the special
        // `<token>` user
        if let Some(token) = &self.identity_token {
            return RegistryAuth::Basic("<token>".to_string(), token.clone());
        }

        RegistryAuth::Anonymous
    }
}

/// Trait for types that can provide authentication
pub trait Authenticator: Send + Sync {
    /// Get the authentication configuration
    fn authorization(&self) -> Result<AuthConfig>;
}

/// Anonymous authenticator
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn authorization(&self) -> Result<AuthConfig> {
        Ok(AuthConfig::anonymous())
    }
}

/// Basic authenticator with username and password
pub struct Basic {
    username: String,
    password: String,
}

impl Basic {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

impl Authenticator for Basic {
    fn authorization(&self) -> Result<AuthConfig> {
        Ok(AuthConfig::new(self.username.clone(), self.password.clone()))
    }
}

/// Docker config file structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuthEntry>,
    #[serde(rename = "credHelpers", default)]
    pub cred_helpers: HashMap<String, String>,
    #[serde(rename = "credsStore", skip_serializing_if = "Option::is_none")]
    pub creds_store: Option<String>,
}

/// Entry in the Docker config auths section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerAuthEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "identitytoken", skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
}

impl DockerAuthEntry {
    /// Convert to AuthConfig
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            username: self.username.clone(),
            password: self.password.clone(),
            auth: self.auth.clone(),
            identity_token: self.identity_token.clone(),
        }
    }
}

/// Resolve the oci-distribution credentials for `reference` through `keychain`.
///
/// Keychain failures degrade to anonymous access; a registry that needs
/// credentials will then reject the request with a clear auth error.
pub fn resolve_registry_auth(keychain: &dyn Keychain, reference: &str) -> RegistryAuth {
    match keychain.resolve(reference).and_then(|a| a.authorization()) {
        Ok(config) => config.to_registry_auth(),
        Err(e) => {
            debug!("Falling back to anonymous auth for {}: {}", reference, e);
            RegistryAuth::Anonymous
        }
    }
}
