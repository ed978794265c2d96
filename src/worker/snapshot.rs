//! Filesystem snapshots backing image layers
//!
//! The native snapshotter stores each committed snapshot as a complete
//! directory tree at `<root>/<key>/fs`, with the parent key (if any) in
//! `<root>/<key>/parent`.

use crate::error::{PushError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a snapshot's filesystem is represented on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotLayout {
    /// Every snapshot holds its complete filesystem
    FullTree,
    /// A snapshot holds only the changes on top of its parent
    UpperOnly,
}

pub trait Snapshotter: Send + Sync {
    fn name(&self) -> &str;

    fn layout(&self) -> SnapshotLayout;

    /// Directory holding the committed snapshot `key`
    fn mount_path(&self, key: &str) -> Result<PathBuf>;

    fn parent(&self, key: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotterBackend {
    Native,
}

impl FromStr for SnapshotterBackend {
    type Err = PushError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" | "naive" => Ok(SnapshotterBackend::Native),
            other => Err(PushError::Environment(format!(
                "unsupported snapshotter backend {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NativeSnapshotter {
    root: PathBuf,
}

impl NativeSnapshotter {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            PushError::Environment(format!(
                "failed to create snapshot directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Create an empty snapshot directory for `key` and return its path.
    pub fn prepare(&self, key: &str, parent: Option<&str>) -> Result<PathBuf> {
        let dir = self.snapshot_dir(key)?;
        let fs = dir.join("fs");
        std::fs::create_dir_all(&fs)?;
        if let Some(parent) = parent {
            self.snapshot_dir(parent)?;
            std::fs::write(dir.join("parent"), parent)?;
        }
        Ok(fs)
    }

    fn snapshot_dir(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\'])
            && !key.chars().any(char::is_control);
        if !valid {
            return Err(PushError::Configuration(format!(
                "invalid snapshot key {:?}",
                key
            )));
        }
        Ok(self.root.join(key))
    }
}

impl Snapshotter for NativeSnapshotter {
    fn name(&self) -> &str {
        "native"
    }

    fn layout(&self) -> SnapshotLayout {
        SnapshotLayout::FullTree
    }

    fn mount_path(&self, key: &str) -> Result<PathBuf> {
        let fs = self.snapshot_dir(key)?.join("fs");
        if !fs.is_dir() {
            return Err(PushError::NotFound(format!("snapshot {} does not exist", key)));
        }
        Ok(fs)
    }

    fn parent(&self, key: &str) -> Result<Option<String>> {
        let path = self.snapshot_dir(key)?.join("parent");
        match std::fs::read_to_string(&path) {
            Ok(parent) => Ok(Some(parent.trim().to_string()).filter(|p| !p.is_empty())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PushError::Environment(format!(
                "failed to read parent of snapshot {}: {}",
                key, e
            ))),
        }
    }
}
