use crate::digest::DigestUtils;
use crate::error::{PushError, Result};
use crate::image::Descriptor;
use serde::{Deserialize, Serialize};

pub struct MediaType;

impl MediaType {
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_CONFIG: &'static str = "application/vnd.oci.image.config.v1+json";
    pub const OCI_LAYER_GZIP: &'static str = "application/vnd.oci.image.layer.v1.tar+gzip";
}

/// OCI image manifest. Field order is the serialized order, which keeps the
/// manifest digest stable for unchanged content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        ImageManifest {
            schema_version: 2,
            media_type: MediaType::OCI_MANIFEST.to_string(),
            config,
            layers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != 2 {
            return Err(PushError::Configuration(format!(
                "unsupported manifest schema version {}",
                self.schema_version
            )));
        }
        let all = std::iter::once(&self.config).chain(self.layers.iter());
        for descriptor in all {
            if !DigestUtils::is_valid_docker_digest(&descriptor.digest) {
                return Err(PushError::Configuration(format!(
                    "manifest references malformed digest {}",
                    descriptor.digest
                )));
            }
        }
        Ok(())
    }

    /// Serialized manifest and its digest
    pub fn to_bytes(&self) -> Result<(Vec<u8>, String)> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| PushError::Configuration(format!("failed to encode manifest: {}", e)))?;
        let digest = DigestUtils::compute_docker_digest(&bytes);
        Ok((bytes, digest))
    }
}
