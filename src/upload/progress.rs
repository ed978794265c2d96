//! Progress reporting for exports

use crate::digest::DigestUtils;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Blob already present remotely or marked known by the filter
    BlobSkipped { digest: String, size: u64 },
    BlobUploading { digest: String, size: u64 },
    BlobUploaded { digest: String, size: u64 },
    ManifestPushed { reference: String, digest: String },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::BlobSkipped { digest, .. } => {
                write!(f, "blob {} already exists", DigestUtils::short(digest))
            }
            ProgressEvent::BlobUploading { digest, .. } => {
                write!(f, "uploading blob {}", DigestUtils::short(digest))
            }
            ProgressEvent::BlobUploaded { digest, .. } => {
                write!(f, "pushed blob {}", DigestUtils::short(digest))
            }
            ProgressEvent::ManifestPushed { reference, digest } => {
                write!(f, "pushed {} ({})", reference, digest)
            }
        }
    }
}

/// Receives export progress. Called from concurrent upload tasks.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
