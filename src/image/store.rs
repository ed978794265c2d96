//! Image metadata store
//!
//! Maps canonical image names to [`ImageRecord`]s. The local implementation
//! keeps the index in `images.json` under the worker root.

use crate::error::{PushError, Result};
use crate::image::ImageRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const IMAGE_INDEX_FILE: &str = "images.json";

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Look up an image by its canonical name
    async fn get(&self, name: &str) -> Result<Option<ImageRecord>>;

    /// Whether the store can serve lookups
    fn is_ready(&self) -> bool {
        true
    }
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<ImageRecord>,
}

pub struct LocalImageStore {
    path: PathBuf,
    images: HashMap<String, ImageRecord>,
}

impl LocalImageStore {
    /// Open the index at `path`. A missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let images = if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|e| {
                PushError::Environment(format!(
                    "failed to read image index {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
                PushError::Environment(format!(
                    "failed to parse image index {}: {}",
                    path.display(),
                    e
                ))
            })?;
            index
                .images
                .into_iter()
                .map(|image| (image.name.clone(), image))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            images,
        })
    }

    /// Record an image and persist the index (write tmp, rename).
    pub fn put(&mut self, record: ImageRecord) -> Result<()> {
        self.images.insert(record.name.clone(), record);

        let mut images: Vec<&ImageRecord> = self.images.values().collect();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        let data = serde_json::to_vec_pretty(&serde_json::json!({ "images": images }))
            .map_err(|e| PushError::Environment(format!("failed to encode image index: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn get(&self, name: &str) -> Result<Option<ImageRecord>> {
        Ok(self.images.get(name).cloned())
    }
}
