//! Registry endpoint discovery from a reference's host component

use crate::config::Config;
use crate::error::{PushError, Result};
use crate::reference::DEFAULT_REGISTRY;
use std::net::IpAddr;
use url::Url;

const DOCKER_HUB_API: &str = "https://registry-1.docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Registry host as written in the reference
    pub registry: String,
    /// Base URL the `/v2/` API lives under
    pub base_url: Url,
}

impl Endpoint {
    pub fn resolve(registry: &str, config: &Config) -> Result<Self> {
        let base = if registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API.to_string()
        } else if config.is_insecure(registry) || is_local(registry) {
            format!("http://{}", registry)
        } else {
            format!("https://{}", registry)
        };

        let base_url = Url::parse(&base).map_err(|e| {
            PushError::Configuration(format!("invalid registry host {}: {}", registry, e))
        })?;
        Ok(Self {
            registry: registry.to_string(),
            base_url,
        })
    }

    /// `{base}/v2/{path}`
    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("/v2/{}", path))?)
    }
}

fn is_local(registry: &str) -> bool {
    let host = match registry.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => registry,
    };
    host == "localhost"
        || host
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}
