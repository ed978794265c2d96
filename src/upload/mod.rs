//! Blob upload: concurrency control, skip decisions and progress reporting

pub mod parallel;
pub mod progress;

use crate::image::Descriptor;
use bytes::Bytes;
use std::collections::HashSet;

pub use parallel::{ParallelUploader, UploadSummary};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgress};

/// Where the bytes of a blob come from
#[derive(Debug, Clone)]
pub enum BlobSource {
    /// Streamed from the worker's content store after its digest is verified
    Stored,
    /// Computed during export and held in memory
    Memory(Bytes),
}

/// A blob the export has to make present in the target repository
#[derive(Debug, Clone)]
pub struct PendingBlob {
    pub descriptor: Descriptor,
    pub source: BlobSource,
}

impl PendingBlob {
    pub fn stored(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            source: BlobSource::Stored,
        }
    }

    pub fn memory(descriptor: Descriptor, data: impl Into<Bytes>) -> Self {
        Self {
            descriptor,
            source: BlobSource::Memory(data.into()),
        }
    }
}

/// Caller-side record of blobs already known to exist remotely. Blobs it
/// reports as known are neither checked nor uploaded.
pub trait BlobFilter: Send + Sync {
    fn is_known(&self, descriptor: &Descriptor) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct KnownDigests {
    digests: HashSet<String>,
}

impl KnownDigests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, digest: impl Into<String>) {
        self.digests.insert(digest.into());
    }
}

impl<S: Into<String>> FromIterator<S> for KnownDigests {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            digests: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl BlobFilter for KnownDigests {
    fn is_known(&self, descriptor: &Descriptor) -> bool {
        self.digests.contains(&descriptor.digest)
    }
}
