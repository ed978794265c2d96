//! Image pusher
//!
//! [`ImagePusher::resolve`] finds the local image and opens an authenticated
//! session with the target repository. The returned [`Pushable`] is consumed
//! by [`Pushable::export`], which uploads missing blobs and then the manifest.

use crate::config::Config;
use crate::error::{PushError, Result};
use crate::exporter::writer::ImageWriter;
use crate::image::{ImageRecord, ImageStore, MediaType};
use crate::reference::Reference;
use crate::registry::{self, Endpoint, RegistryClient};
use crate::upload::{BlobFilter, ParallelUploader, ProgressEvent, ProgressSink, UploadSummary};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Request to publish one local image under its canonical name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub name: String,
}

impl PushRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TryFrom<HashMap<String, String>> for PushRequest {
    type Error = PushError;

    fn try_from(mut attrs: HashMap<String, String>) -> Result<Self> {
        attrs
            .remove("name")
            .map(PushRequest::new)
            .ok_or_else(|| PushError::InvalidReference("push request has no name".to_string()))
    }
}

pub struct PusherOpt {
    pub images: Arc<dyn ImageStore>,
    pub writer: ImageWriter,
    pub config: Config,
}

pub struct ImagePusher {
    images: Arc<dyn ImageStore>,
    writer: Arc<ImageWriter>,
    config: Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub reference: String,
    pub manifest_digest: String,
    pub uploads: UploadSummary,
}

impl ImagePusher {
    pub fn new(opt: PusherOpt) -> Result<Self> {
        if !opt.images.is_ready() {
            return Err(PushError::Configuration(
                "image store is not ready".to_string(),
            ));
        }
        Ok(Self {
            images: opt.images,
            writer: Arc::new(opt.writer),
            config: opt.config,
        })
    }

    /// Resolve `request` against the local image store and the target
    /// registry. Performs no remote mutation.
    pub async fn resolve(
        &self,
        request: &PushRequest,
        cancel: &CancellationToken,
    ) -> Result<Pushable> {
        let reference = Reference::parse(&request.name)?;

        let record = self
            .images
            .get(&request.name)
            .await?
            .ok_or_else(|| PushError::NotFound(format!("no local image named {}", request.name)))?;

        let endpoint = Endpoint::resolve(reference.registry(), &self.config)?;
        self.connect(reference, record, endpoint, cancel).await
    }

    async fn connect(
        &self,
        reference: Reference,
        record: ImageRecord,
        endpoint: Endpoint,
        cancel: &CancellationToken,
    ) -> Result<Pushable> {
        let credentials = registry::lookup_credentials(reference.registry(), &self.config)?;
        let client = RegistryClient::builder(endpoint, reference.repository())
            .with_config(&self.config)
            .with_credentials(credentials)
            .build()?;

        client.authenticate(cancel).await?;

        tracing::info!(
            reference = %reference,
            base_url = %client.endpoint().base_url,
            layers = record.layers.len(),
            "Image resolved"
        );

        Ok(Pushable {
            reference,
            record,
            client,
            writer: Arc::clone(&self.writer),
            concurrency: self.config.upload_concurrency,
        })
    }
}

/// A resolved image ready to be exported once
pub struct Pushable {
    reference: Reference,
    record: ImageRecord,
    client: RegistryClient,
    writer: Arc<ImageWriter>,
    concurrency: usize,
}

impl std::fmt::Debug for Pushable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pushable")
            .field("reference", &self.reference.to_string())
            .field("layers", &self.record.layers.len())
            .finish()
    }
}

impl Pushable {
    /// Upload every blob the registry lacks, then the manifest. A reference
    /// pinned to a digest must match the materialized manifest, otherwise
    /// nothing is sent.
    pub async fn export(
        self,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressSink>,
        filter: Option<&dyn BlobFilter>,
    ) -> Result<ExportOutcome> {
        let image = self.writer.materialize(&self.record, cancel).await?;

        if let Some(pinned) = self
            .reference
            .digest()
            .filter(|digest| *digest != image.manifest_digest)
        {
            return Err(PushError::NotFound(format!(
                "no local image matches {}: {} materializes as {}",
                pinned, self.record.name, image.manifest_digest
            )));
        }

        let uploads = ParallelUploader::new(
            &self.client,
            self.writer.content_store(),
            self.concurrency,
        )
        .with_progress(progress)
        .with_filter(filter)
        .upload_all(image.blobs(), cancel)
        .await?;

        let target = self.reference.target();
        let manifest_digest = self
            .client
            .put_manifest(target, MediaType::OCI_MANIFEST, image.manifest, cancel)
            .await?;

        if manifest_digest != image.manifest_digest {
            tracing::warn!(
                expected = %image.manifest_digest,
                actual = %manifest_digest,
                "Registry stored manifest under a different digest"
            );
        }

        let reference = self.reference.to_string();
        if let Some(progress) = progress {
            progress.report(&ProgressEvent::ManifestPushed {
                reference: reference.clone(),
                digest: manifest_digest.clone(),
            });
        }

        Ok(ExportOutcome {
            reference,
            manifest_digest,
            uploads,
        })
    }
}
