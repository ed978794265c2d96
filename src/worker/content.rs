//! Content-addressable blob store
//!
//! Blobs live at `blobs/sha256/<hex>` below the store root, the same layout
//! an OCI image layout uses.

use crate::digest::DigestUtils;
use crate::error::{PushError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

pub const BLOBS_DIR: &str = "blobs";
pub const SHA256_DIR: &str = "sha256";

pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Size of the blob, or `None` when it is not stored
    async fn info(&self, digest: &str) -> Result<Option<u64>>;

    /// Full blob contents
    async fn read(&self, digest: &str) -> Result<Vec<u8>>;

    /// Stream the blob contents without buffering them
    async fn reader(&self, digest: &str) -> Result<BlobReader>;
}

#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    /// Open the store rooted at `root`, creating the blob directory if needed.
    pub fn open(root: &Path) -> Result<Self> {
        let blob_dir = root.join(BLOBS_DIR).join(SHA256_DIR);
        std::fs::create_dir_all(&blob_dir).map_err(|e| {
            PushError::Environment(format!(
                "failed to create content store {}: {}",
                blob_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let hex_part = DigestUtils::extract_hex_part(digest)?;
        Ok(self.root.join(BLOBS_DIR).join(SHA256_DIR).join(hex_part))
    }

    /// Store `data` and return its digest. Existing blobs are left untouched.
    pub fn write(&self, data: &[u8]) -> Result<String> {
        let digest = DigestUtils::compute_docker_digest(data);
        let path = self.blob_path(&digest)?;
        if !path.exists() {
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)?;
        }
        Ok(digest)
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn info(&self, digest: &str) -> Result<Option<u64>> {
        let path = self.blob_path(digest)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PushError::Environment(format!(
                "failed to stat blob {}: {}",
                digest, e
            ))),
        }
    }

    async fn read(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| read_error(digest, e))
    }

    async fn reader(&self, digest: &str) -> Result<BlobReader> {
        let path = self.blob_path(digest)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| read_error(digest, e))?;
        Ok(Box::new(file))
    }
}

fn read_error(digest: &str, e: std::io::Error) -> PushError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PushError::NotFound(format!("blob {} is not in the content store", digest))
    } else {
        PushError::Environment(format!("failed to read blob {}: {}", digest, e))
    }
}
