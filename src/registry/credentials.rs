//! Credentials stored in a docker `config.json`
//!
//! Reads the `auths` map that `docker login` maintains. Each entry carries
//! either a base64 `user:password` pair in `auth` or explicit fields.

use crate::error::{PushError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";
const DOCKER_HUB_KEYS: [&str; 3] = [
    "https://index.docker.io/v1/",
    "index.docker.io",
    "registry-1.docker.io",
];

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store backed by `<dir>/config.json`
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CONFIG_FILE),
        }
    }

    /// Credentials for `registry`, if any are stored.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;

        let mut keys = vec![registry.to_string(), format!("https://{}", registry)];
        if registry == crate::reference::DEFAULT_REGISTRY {
            keys.extend(DOCKER_HUB_KEYS.iter().map(|k| k.to_string()));
        }

        let entry = keys.iter().find_map(|key| {
            file.auths.get(key).or_else(|| {
                file.auths
                    .iter()
                    .find(|(k, _)| k.trim_end_matches('/') == key.as_str())
                    .map(|(_, v)| v)
            })
        });

        match entry {
            Some(entry) => decode_entry(registry, entry),
            None => Ok(None),
        }
    }

    fn load(&self) -> Result<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            PushError::Environment(format!(
                "failed to read docker config {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            PushError::Environment(format!(
                "failed to parse docker config {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

fn decode_entry(registry: &str, entry: &AuthEntry) -> Result<Option<(String, String)>> {
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(Some((username.clone(), password.clone())));
    }

    let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) else {
        return Ok(None);
    };
    let malformed = || {
        PushError::Authorization(format!("stored credentials for {} are malformed", registry))
    };
    let decoded = STANDARD.decode(auth.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (username, password) = decoded.split_once(':').ok_or_else(malformed)?;
    Ok(Some((username.to_string(), password.to_string())))
}
