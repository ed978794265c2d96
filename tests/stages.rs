mod common;

use async_trait::async_trait;
use common::{LocalImage, init_tracing};
use image_pusher::error::{PushError, Result, Stage};
use image_pusher::image::{ImageRecord, ImageStore};
use image_pusher::push::Client;
use image_pusher::worker::{
    LocalWorker, SnapshotLayout, Snapshotter, WorkerBuilder, WorkerContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

struct UpperOnly;

impl Snapshotter for UpperOnly {
    fn name(&self) -> &str {
        "overlayfs"
    }

    fn layout(&self) -> SnapshotLayout {
        SnapshotLayout::UpperOnly
    }

    fn mount_path(&self, key: &str) -> Result<PathBuf> {
        Err(PushError::NotFound(key.to_string()))
    }

    fn parent(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

struct Offline;

#[async_trait]
impl ImageStore for Offline {
    async fn get(&self, _name: &str) -> Result<Option<ImageRecord>> {
        Err(PushError::Environment("store offline".into()))
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// Wraps the local worker, optionally swapping collaborators.
struct PatchedWorker {
    inner: LocalWorker,
    upper_only: bool,
    offline_images: bool,
    builds: AtomicUsize,
}

impl PatchedWorker {
    fn new(image: &LocalImage) -> Self {
        Self {
            inner: LocalWorker::new(image.root.path(), "native"),
            upper_only: false,
            offline_images: false,
            builds: AtomicUsize::new(0),
        }
    }
}

impl WorkerBuilder for PatchedWorker {
    fn build(&self) -> Result<WorkerContext> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let mut ctx = self.inner.build()?;
        if self.upper_only {
            ctx.snapshotter = Arc::new(UpperOnly);
        }
        if self.offline_images {
            ctx.image_store = Arc::new(Offline);
        }
        Ok(ctx)
    }
}

const NAME: &str = "registry.example.com/team/app:1.0";

#[tokio::test]
async fn test_incompatible_differ_fails_writer_stage() {
    init_tracing();
    let image = LocalImage::create(NAME);
    let worker = PatchedWorker {
        upper_only: true,
        ..PatchedWorker::new(&image)
    };

    let failure = Client::with_worker(image.config(), Arc::new(worker))
        .push(NAME, &CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::CreateWriter);
    assert_eq!(failure.reference, NAME);
    assert!(matches!(failure.kind(), PushError::Configuration(_)));
    assert!(failure.to_string().starts_with("creating image writer"));
}

#[tokio::test]
async fn test_unready_image_store_fails_pusher_stage() {
    init_tracing();
    let image = LocalImage::create(NAME);
    let worker = PatchedWorker {
        offline_images: true,
        ..PatchedWorker::new(&image)
    };

    let failure = Client::with_worker(image.config(), Arc::new(worker))
        .push(NAME, &CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::CreatePusher);
    assert!(matches!(failure.kind(), PushError::Configuration(_)));
}

#[tokio::test]
async fn test_invalid_names_never_build_a_worker() {
    init_tracing();
    let image = LocalImage::create(NAME);
    let worker = Arc::new(PatchedWorker::new(&image));
    let client = Client::with_worker(image.config(), worker.clone());

    for name in ["", "My-App", "app:tag:extra", "app@sha256:short", "-leading"] {
        let failure = client
            .push(name, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Normalize, "{:?}", name);
        assert!(matches!(failure.kind(), PushError::InvalidReference(_)));
    }
    assert_eq!(worker.builds.load(Ordering::SeqCst), 0);
}

#[test]
fn test_normalize_examples() {
    assert_eq!(
        image_pusher::normalize("my-app").unwrap(),
        "docker.io/library/my-app:latest"
    );
    for name in ["my-app", "ghcr.io/team/app:1.0", "localhost:5000/a/b", "index.docker.io/x/y"] {
        let once = image_pusher::normalize(name).unwrap();
        assert_eq!(image_pusher::normalize(&once).unwrap(), once);
    }
}
