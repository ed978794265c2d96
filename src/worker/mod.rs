//! Local worker environment
//!
//! A [`WorkerContext`] bundles the four handles a push reads from: content
//! store, snapshotter, differ and image metadata store. Each push builds its
//! own context through a [`WorkerBuilder`].

pub mod content;
pub mod differ;
pub mod snapshot;

use crate::config::Config;
use crate::error::{PushError, Result};
use crate::image::store::{IMAGE_INDEX_FILE, ImageStore, LocalImageStore};
use std::path::PathBuf;
use std::sync::Arc;

pub use content::{BlobReader, ContentStore, LocalContentStore};
pub use differ::{Differ, LayerBlob, WalkingDiffer};
pub use snapshot::{NativeSnapshotter, SnapshotLayout, Snapshotter, SnapshotterBackend};

pub const CONTENT_DIR: &str = "content";
pub const SNAPSHOTS_DIR: &str = "snapshots";

#[derive(Clone)]
pub struct WorkerContext {
    pub content_store: Arc<dyn ContentStore>,
    pub snapshotter: Arc<dyn Snapshotter>,
    pub differ: Arc<dyn Differ>,
    pub image_store: Arc<dyn ImageStore>,
}

pub trait WorkerBuilder: Send + Sync {
    fn build(&self) -> Result<WorkerContext>;
}

/// Builds worker contexts from a local root directory:
///
/// ```text
/// <root>/
///   content/blobs/sha256/<hex>
///   snapshots/<backend>/<key>/fs
///   images.json
/// ```
#[derive(Debug, Clone)]
pub struct LocalWorker {
    root: PathBuf,
    snapshotter: String,
}

impl LocalWorker {
    pub fn new(root: impl Into<PathBuf>, snapshotter: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            snapshotter: snapshotter.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.root.clone(), config.snapshotter.clone())
    }

    /// Directory the native snapshotter keeps its snapshots in
    pub fn snapshot_root(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR).join(&self.snapshotter)
    }

    fn ensure_root(&self) -> Result<()> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(PushError::Environment(format!(
                "worker root {} is not a directory",
                self.root.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&self.root).map_err(|e| {
                    PushError::Environment(format!(
                        "failed to create worker root {}: {}",
                        self.root.display(),
                        e
                    ))
                })
            }
            Err(e) => Err(PushError::Environment(format!(
                "worker root {} is not accessible: {}",
                self.root.display(),
                e
            ))),
        }
    }
}

impl WorkerBuilder for LocalWorker {
    fn build(&self) -> Result<WorkerContext> {
        let backend: SnapshotterBackend = self.snapshotter.parse()?;
        self.ensure_root()?;

        let content_store = LocalContentStore::open(&self.root.join(CONTENT_DIR))?;
        let snapshotter = match backend {
            SnapshotterBackend::Native => NativeSnapshotter::open(&self.snapshot_root())?,
        };
        let image_store = LocalImageStore::open(&self.root.join(IMAGE_INDEX_FILE))?;

        tracing::debug!(
            root = %self.root.display(),
            snapshotter = %self.snapshotter,
            images = image_store.len(),
            "Worker context ready"
        );

        Ok(WorkerContext {
            content_store: Arc::new(content_store),
            snapshotter: Arc::new(snapshotter),
            differ: Arc::new(WalkingDiffer::new()),
            image_store: Arc::new(image_store),
        })
    }
}
