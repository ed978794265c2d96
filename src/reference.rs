//! Image reference normalization
//!
//! Turns a human image name such as `my-app` or `ghcr.io/org/app:v1` into a
//! fully qualified reference (`docker.io/library/my-app:latest`). Parsing is
//! delegated to the OCI distribution reference grammar in `oci-spec`.

use crate::digest::{DigestUtils, SHA256_PREFIX};
use crate::error::{PushError, Result};
use oci_spec::distribution::Reference as OciReference;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// A fully qualified image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    inner: OciReference,
}

/// Canonicalize `raw` into its fully qualified string form.
pub fn normalize(raw: &str) -> Result<String> {
    Reference::parse(raw).map(|r| r.to_string())
}

impl Reference {
    pub fn parse(raw: &str) -> Result<Self> {
        let inner: OciReference = raw
            .parse()
            .map_err(|e: oci_spec::distribution::ParseError| invalid(raw, &e.to_string()))?;

        // The grammar lets uppercase through in a first component that is
        // not a registry host.
        if inner.repository().chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid(raw, "repository name must be lowercase"));
        }
        if let Some(digest) = inner.digest() {
            if digest.starts_with(SHA256_PREFIX) && !DigestUtils::is_valid_docker_digest(digest) {
                return Err(invalid(raw, "sha256 digest must be 64 lowercase hex characters"));
            }
        }
        Ok(Self { inner })
    }

    /// Registry host, including port when present
    pub fn registry(&self) -> &str {
        self.inner.registry()
    }

    pub fn repository(&self) -> &str {
        self.inner.repository()
    }

    pub fn tag(&self) -> Option<&str> {
        self.inner.tag()
    }

    pub fn digest(&self) -> Option<&str> {
        self.inner.digest()
    }

    /// The manifest reference a push writes to: the tag, or the digest when
    /// the reference is digest-only.
    pub fn target(&self) -> &str {
        self.tag().or(self.digest()).unwrap_or(DEFAULT_TAG)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry(), self.repository())?;
        if let Some(tag) = self.tag() {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = self.digest() {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = PushError;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)
    }
}

fn invalid(raw: &str, reason: &str) -> PushError {
    PushError::InvalidReference(format!("{:?}: {}", raw, reason))
}
