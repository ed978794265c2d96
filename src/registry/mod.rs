//! Registry access
//!
//! Endpoint discovery, credential lookup, token authentication and the
//! HTTP client used to publish blobs and manifests.

pub mod auth;
pub mod client;
pub mod credentials;
pub mod endpoint;

pub use auth::{Auth, AuthChallenge};
pub use client::{BlobBody, RegistryClient, RegistryClientBuilder};
pub use credentials::CredentialStore;
pub use endpoint::Endpoint;

use crate::config::Config;
use crate::error::Result;

/// Credentials for `registry`: explicit config first, then the docker
/// config directory.
pub fn lookup_credentials(registry: &str, config: &Config) -> Result<Option<(String, String)>> {
    if let Some((username, password)) = config.auth.credentials() {
        return Ok(Some((username.to_string(), password.to_string())));
    }
    match &config.docker_config {
        Some(dir) => CredentialStore::new(dir).get(registry),
        None => Ok(None),
    }
}
