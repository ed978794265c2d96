//! Image writer
//!
//! Turns a local [`ImageRecord`] into the blobs and manifest a registry
//! push needs. Layers with a committed blob are uploaded from the content store;
//! the rest are computed from their snapshots with the differ. Nothing
//! computed here is written back to local storage.

use crate::cancel::with_cancel;
use crate::digest::DigestUtils;
use crate::error::{PushError, Result};
use crate::image::{Descriptor, ImageManifest, ImageRecord, LayerRecord, MediaType};
use crate::upload::PendingBlob;
use crate::worker::{ContentStore, Differ, LayerBlob, Snapshotter};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct WriterOpt {
    pub content: Arc<dyn ContentStore>,
    pub snapshotter: Arc<dyn Snapshotter>,
    pub differ: Arc<dyn Differ>,
}

/// Everything needed to publish one image
#[derive(Debug, Clone)]
pub struct ExportableImage {
    pub config: PendingBlob,
    pub layers: Vec<PendingBlob>,
    pub manifest: Bytes,
    pub manifest_digest: String,
}

impl ExportableImage {
    /// Config and layer blobs; all must be committed before the manifest.
    /// In-memory contents are shared, not copied.
    pub fn blobs(&self) -> Vec<PendingBlob> {
        let mut blobs = self.layers.clone();
        blobs.push(self.config.clone());
        blobs
    }
}

pub struct ImageWriter {
    content: Arc<dyn ContentStore>,
    snapshotter: Arc<dyn Snapshotter>,
    differ: Arc<dyn Differ>,
}

impl ImageWriter {
    pub fn new(opt: WriterOpt) -> Result<Self> {
        let layout = opt.snapshotter.layout();
        if !opt.differ.supports(layout) {
            return Err(PushError::Configuration(format!(
                "differ cannot read {:?} snapshots from snapshotter {}",
                layout,
                opt.snapshotter.name()
            )));
        }
        Ok(Self {
            content: opt.content,
            snapshotter: opt.snapshotter,
            differ: opt.differ,
        })
    }

    pub fn content_store(&self) -> Arc<dyn ContentStore> {
        Arc::clone(&self.content)
    }

    pub async fn materialize(
        &self,
        record: &ImageRecord,
        cancel: &CancellationToken,
    ) -> Result<ExportableImage> {
        let mut layers = Vec::with_capacity(record.layers.len());
        let mut diff_ids = Vec::with_capacity(record.layers.len());

        for (index, layer) in record.layers.iter().enumerate() {
            let (blob, diff_id) = self
                .layer_blob(layer, cancel)
                .await
                .map_err(|e| e.context(format!("layer {}", index)))?;
            layers.push(blob);
            diff_ids.push(diff_id);
        }

        let config_bytes = with_cancel(cancel, self.content.read(&record.config.digest))
            .await
            .map_err(|e| e.context("reading image config"))?;
        DigestUtils::verify_data_integrity(&config_bytes, &record.config.digest)?;
        let config_bytes = rewrite_rootfs(&config_bytes, &diff_ids)?;
        let config_descriptor = Descriptor::new(
            MediaType::OCI_CONFIG,
            DigestUtils::compute_docker_digest(&config_bytes),
            config_bytes.len() as u64,
        );

        let manifest = ImageManifest::new(
            config_descriptor.clone(),
            layers.iter().map(|l| l.descriptor.clone()).collect(),
        );
        manifest.validate()?;
        let (manifest, manifest_digest) = manifest.to_bytes()?;

        tracing::debug!(
            image = %record.name,
            layers = layers.len(),
            manifest_digest = %manifest_digest,
            "Image materialized"
        );

        Ok(ExportableImage {
            config: PendingBlob::memory(config_descriptor, config_bytes),
            layers,
            manifest: Bytes::from(manifest),
            manifest_digest,
        })
    }

    async fn layer_blob(
        &self,
        layer: &LayerRecord,
        cancel: &CancellationToken,
    ) -> Result<(PendingBlob, String)> {
        if let (Some(blob), Some(diff_id)) = (&layer.blob, &layer.diff_id) {
            let stored = with_cancel(cancel, self.content.info(&blob.digest)).await?;
            if stored == Some(blob.size) {
                return Ok((PendingBlob::stored(blob.clone()), diff_id.clone()));
            }
            tracing::debug!(
                snapshot = %layer.snapshot,
                digest = %blob.digest,
                "Recorded layer blob missing from content store, recomputing"
            );
        }

        let LayerBlob {
            descriptor,
            diff_id,
            data,
        } = self.compute(&layer.snapshot, cancel).await?;
        Ok((PendingBlob::memory(descriptor, data), diff_id))
    }

    async fn compute(&self, key: &str, cancel: &CancellationToken) -> Result<LayerBlob> {
        let upper = self.snapshotter.mount_path(key)?;
        let lower = match self.snapshotter.parent(key)? {
            Some(parent) => Some(self.snapshotter.mount_path(&parent)?),
            None => None,
        };

        let differ = Arc::clone(&self.differ);
        let token = cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            differ.compare(lower.as_deref(), &upper, &token)
        });
        with_cancel(cancel, async {
            task.await
                .map_err(|e| PushError::Environment(format!("layer diff task failed: {}", e)))?
        })
        .await
    }
}

/// Point the config's `rootfs` at the layers being pushed
fn rewrite_rootfs(config: &[u8], diff_ids: &[String]) -> Result<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(config)
        .map_err(|e| PushError::Environment(format!("image config is not valid JSON: {}", e)))?;
    let Some(object) = value.as_object_mut() else {
        return Err(PushError::Environment(
            "image config is not a JSON object".to_string(),
        ));
    };
    object.insert(
        "rootfs".to_string(),
        json!({ "type": "layers", "diff_ids": diff_ids }),
    );
    serde_json::to_vec(&value)
        .map_err(|e| PushError::Environment(format!("failed to encode image config: {}", e)))
}
