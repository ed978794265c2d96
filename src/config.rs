//! Configuration for the push pipeline
//!
//! Settings come from builder-style setters or from the environment via
//! [`Config::from_env`].

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SNAPSHOTTER: &str = "native";
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username, password)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Worker root holding content, snapshots and the image index
    pub root: PathBuf,
    /// Snapshotter backend name
    pub snapshotter: String,
    /// Explicit registry credentials; overrides the docker config file
    pub auth: AuthConfig,
    /// Directory containing a docker `config.json` with stored credentials
    pub docker_config: Option<PathBuf>,
    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,
    /// Accept invalid TLS certificates
    pub skip_tls: bool,
    /// Maximum blob uploads in flight
    pub upload_concurrency: usize,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var_os("HOME").map(PathBuf::from);
        Self {
            root: home
                .as_ref()
                .map(|h| h.join(".local/share/image-pusher"))
                .unwrap_or_else(|| PathBuf::from(".image-pusher")),
            snapshotter: DEFAULT_SNAPSHOTTER.to_string(),
            auth: AuthConfig::default(),
            docker_config: home.map(|h| h.join(".docker")),
            insecure_registries: Vec::new(),
            skip_tls: false,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Read settings from `IMAGE_PUSHER_*` and registry environment variables.
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(root) = env::var_os("IMAGE_PUSHER_ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Ok(snapshotter) = env::var("IMAGE_PUSHER_SNAPSHOTTER") {
            config.snapshotter = snapshotter;
        }
        config.auth = AuthConfig {
            username: env::var("REGISTRY_USERNAME").ok(),
            password: env::var("REGISTRY_PASSWORD").ok(),
        };
        if let Some(dir) = env::var_os("DOCKER_CONFIG") {
            config.docker_config = Some(PathBuf::from(dir));
        }
        if let Ok(list) = env::var("INSECURE_REGISTRIES") {
            config.insecure_registries = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        config.skip_tls = env::var("SKIP_TLS").is_ok_and(|v| v == "true" || v == "1");
        if let Some(n) = env::var("UPLOAD_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.upload_concurrency = n;
        }

        config
    }

    pub fn with_snapshotter(mut self, snapshotter: impl Into<String>) -> Self {
        self.snapshotter = snapshotter.into();
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_docker_config(mut self, dir: Option<PathBuf>) -> Self {
        self.docker_config = dir;
        self
    }

    pub fn with_insecure_registry(mut self, registry: impl Into<String>) -> Self {
        self.insecure_registries.push(registry.into());
        self
    }

    pub fn with_upload_concurrency(mut self, n: usize) -> Self {
        self.upload_concurrency = n.max(1);
        self
    }

    pub fn has_auth(&self) -> bool {
        self.auth.credentials().is_some()
    }

    pub fn is_insecure(&self, registry: &str) -> bool {
        self.insecure_registries.iter().any(|r| r == registry)
    }
}
