//! Local image metadata
//!
//! [`ImageRecord`] is what the image store keeps for each named image: the
//! config blob and the ordered layer snapshots that make up its filesystem.

pub mod manifest;
pub mod store;

use serde::{Deserialize, Serialize};

pub use manifest::{ImageManifest, MediaType};
pub use store::{ImageStore, LocalImageStore};

/// Content descriptor in OCI JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
        }
    }
}

/// One filesystem layer of a local image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Snapshot holding the layer's full filesystem tree
    pub snapshot: String,
    /// Compressed blob already in the content store, if one was committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<Descriptor>,
    /// Digest of the uncompressed layer tar, required alongside `blob`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Fully qualified reference
    pub name: String,
    /// Image config blob in the content store
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<LayerRecord>,
}
