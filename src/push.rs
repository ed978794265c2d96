//! Push orchestration
//!
//! [`Client::push`] runs the stages in order and stops at the first failure:
//! normalize the name, build a worker context, create the image writer and
//! pusher, resolve the image, then export it. Every failure is reported as a
//! [`PushFailure`] naming the stage and the reference involved.

use crate::config::Config;
use crate::error::{PushError, PushFailure, Stage};
use crate::exporter::{ImagePusher, ImageWriter, PushRequest, PusherOpt, WriterOpt};
use crate::reference;
use crate::upload::{BlobFilter, ProgressSink};
use crate::worker::{LocalWorker, WorkerBuilder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

/// Where a push currently stands. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Initial,
    Normalized,
    ContextBuilt,
    WriterReady,
    PusherReady,
    Resolved,
    Exported,
    Failed(Stage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub reference: String,
    pub manifest_digest: String,
}

/// Ordered record of the states one push passed through
#[derive(Debug, Default)]
struct StateLog {
    states: Vec<PushState>,
}

impl StateLog {
    fn new() -> Self {
        Self {
            states: vec![PushState::Initial],
        }
    }

    fn advance(&mut self, state: PushState) {
        tracing::debug!(?state, "Push state changed");
        self.states.push(state);
    }

    fn fail(&mut self, stage: Stage, reference: &str, source: PushError) -> PushFailure {
        self.advance(PushState::Failed(stage));
        let failure = PushFailure::new(stage, reference, source);
        tracing::error!(
            stage = %stage,
            reference = %reference,
            retryable = failure.source.is_retryable(),
            "Push failed: {}",
            failure.source
        );
        failure
    }
}

pub struct Client {
    config: Config,
    worker: Arc<dyn WorkerBuilder>,
    filter: Option<Arc<dyn BlobFilter>>,
}

impl Client {
    /// Client using a local worker rooted at `config.root`
    pub fn new(config: Config) -> Self {
        let worker = Arc::new(LocalWorker::from_config(&config));
        Self::with_worker(config, worker)
    }

    pub fn with_worker(config: Config, worker: Arc<dyn WorkerBuilder>) -> Self {
        Self {
            config,
            worker,
            filter: None,
        }
    }

    /// Blobs the filter reports as known are assumed present remotely.
    pub fn with_blob_filter(mut self, filter: Arc<dyn BlobFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Push the local image `image` to the registry its name points at.
    pub async fn push(
        &self,
        image: &str,
        cancel: &CancellationToken,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<PushOutcome, PushFailure> {
        let mut log = StateLog::new();
        let result = self.run(image, cancel, progress, &mut log).await;
        tracing::debug!(states = ?log.states, "Push finished");
        result
    }

    #[instrument(skip_all, fields(push_id = %Uuid::new_v4(), image = %image))]
    async fn run(
        &self,
        image: &str,
        cancel: &CancellationToken,
        progress: Option<Arc<dyn ProgressSink>>,
        log: &mut StateLog,
    ) -> Result<PushOutcome, PushFailure> {
        let name = reference::normalize(image)
            .map_err(|e| log.fail(Stage::Normalize, image, e))?;
        log.advance(PushState::Normalized);
        tracing::info!(reference = %name, "Pushing image");

        let ctx = self
            .worker
            .build()
            .map_err(|e| log.fail(Stage::BuildContext, &name, e))?;
        log.advance(PushState::ContextBuilt);

        let writer = ImageWriter::new(WriterOpt {
            content: Arc::clone(&ctx.content_store),
            snapshotter: Arc::clone(&ctx.snapshotter),
            differ: Arc::clone(&ctx.differ),
        })
        .map_err(|e| log.fail(Stage::CreateWriter, &name, e))?;
        log.advance(PushState::WriterReady);

        let pusher = ImagePusher::new(PusherOpt {
            images: Arc::clone(&ctx.image_store),
            writer,
            config: self.config.clone(),
        })
        .map_err(|e| log.fail(Stage::CreatePusher, &name, e))?;
        log.advance(PushState::PusherReady);

        let request = PushRequest::new(name.clone());
        let pushable = pusher
            .resolve(&request, cancel)
            .await
            .map_err(|e| log.fail(Stage::Resolve, &name, e))?;
        log.advance(PushState::Resolved);

        let outcome = pushable
            .export(cancel, progress.as_deref(), self.filter.as_deref())
            .await
            .map_err(|e| log.fail(Stage::Export, &name, e))?;
        log.advance(PushState::Exported);

        tracing::info!(
            reference = %outcome.reference,
            digest = %outcome.manifest_digest,
            uploaded = outcome.uploads.uploaded,
            skipped = outcome.uploads.skipped,
            "Image pushed"
        );

        Ok(PushOutcome {
            reference: outcome.reference,
            manifest_digest: outcome.manifest_digest,
        })
    }
}
