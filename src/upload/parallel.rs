//! Parallel blob upload with concurrency control

use crate::cancel::with_cancel;
use crate::digest::DigestUtils;
use crate::error::{PushError, Result};
use crate::registry::{BlobBody, RegistryClient};
use crate::upload::{BlobFilter, BlobSource, PendingBlob, ProgressEvent, ProgressSink};
use crate::worker::ContentStore;
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Body;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub bytes_uploaded: u64,
}

enum Outcome {
    Skipped,
    Uploaded(u64),
}

pub struct ParallelUploader<'a> {
    client: &'a RegistryClient,
    content: Arc<dyn ContentStore>,
    max_concurrent: usize,
    progress: Option<&'a dyn ProgressSink>,
    filter: Option<&'a dyn BlobFilter>,
}

impl<'a> ParallelUploader<'a> {
    pub fn new(
        client: &'a RegistryClient,
        content: Arc<dyn ContentStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            content,
            max_concurrent: max_concurrent.max(1),
            progress: None,
            filter: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_filter(mut self, filter: Option<&'a dyn BlobFilter>) -> Self {
        self.filter = filter;
        self
    }

    fn report(&self, event: ProgressEvent) {
        if let Some(progress) = self.progress {
            progress.report(&event);
        }
    }

    /// Make every blob present in the target repository. Returns once all of
    /// them are committed, or with the first failure.
    pub async fn upload_all(
        &self,
        blobs: Vec<PendingBlob>,
        cancel: &CancellationToken,
    ) -> Result<UploadSummary> {
        let start_time = Instant::now();
        let semaphore = Semaphore::new(self.max_concurrent);

        tracing::debug!(
            blobs = blobs.len(),
            max_concurrent = self.max_concurrent,
            "Starting blob uploads"
        );

        let uploads = blobs
            .into_iter()
            .map(|blob| self.upload_one(blob, &semaphore, cancel));
        let outcomes = try_join_all(uploads).await?;

        let mut summary = UploadSummary::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Uploaded(size) => {
                    summary.uploaded += 1;
                    summary.bytes_uploaded += size;
                }
            }
        }

        tracing::info!(
            uploaded = summary.uploaded,
            skipped = summary.skipped,
            bytes = summary.bytes_uploaded,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Blob uploads finished"
        );
        Ok(summary)
    }

    async fn upload_one(
        &self,
        blob: PendingBlob,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let PendingBlob { descriptor, source } = blob;
        let digest = descriptor.digest.as_str();
        let size = descriptor.size;

        if self.filter.is_some_and(|f| f.is_known(&descriptor)) {
            tracing::debug!(digest = %digest, "Blob marked as known, skipping");
            self.report(ProgressEvent::BlobSkipped {
                digest: digest.to_string(),
                size,
            });
            return Ok(Outcome::Skipped);
        }

        let _permit = with_cancel(cancel, async {
            semaphore
                .acquire()
                .await
                .map_err(|e| PushError::Environment(format!("upload permit unavailable: {}", e)))
        })
        .await?;

        if self.client.blob_exists(digest, cancel).await? {
            tracing::debug!(digest = %digest, "Blob already in registry, skipping");
            self.report(ProgressEvent::BlobSkipped {
                digest: digest.to_string(),
                size,
            });
            return Ok(Outcome::Skipped);
        }

        if let BlobSource::Stored = source {
            with_cancel(cancel, async {
                let reader = self.content.reader(digest).await?;
                DigestUtils::verify_reader(reader, digest).await
            })
            .await
            .map_err(|e| e.context(format!("reading blob {}", DigestUtils::short(digest))))?;
        }

        self.report(ProgressEvent::BlobUploading {
            digest: digest.to_string(),
            size,
        });
        let body = SourceBody {
            source: &source,
            content: self.content.as_ref(),
            digest,
        };
        self.client.upload_blob(digest, size, &body, cancel).await?;
        self.report(ProgressEvent::BlobUploaded {
            digest: digest.to_string(),
            size,
        });
        Ok(Outcome::Uploaded(size))
    }
}

/// Request body for one pending blob: a refcounted buffer, or a fresh stream
/// over the stored blob for every attempt.
struct SourceBody<'a> {
    source: &'a BlobSource,
    content: &'a dyn ContentStore,
    digest: &'a str,
}

#[async_trait]
impl<'a> BlobBody for SourceBody<'a> {
    async fn body(&self) -> Result<Body> {
        match self.source {
            BlobSource::Memory(data) => Ok(Body::from(data.clone())),
            BlobSource::Stored => {
                let reader = self.content.reader(self.digest).await?;
                Ok(Body::wrap_stream(ReaderStream::new(reader)))
            }
        }
    }
}
