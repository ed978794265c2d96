//! Layer differ
//!
//! Compares two full-tree snapshots and emits the changes as a gzip
//! compressed tar layer. Removed paths become OCI whiteout entries
//! (`.wh.<name>`). Entries are written in sorted order with normalized
//! ownership and timestamps so unchanged trees always produce the same blob.
//! The walk stops at the next entry once the cancellation token fires.

use crate::digest::DigestUtils;
use crate::error::{PushError, Result};
use crate::image::{Descriptor, MediaType};
use crate::worker::snapshot::SnapshotLayout;
use bytes::Bytes;
use flate2::{Compression, GzBuilder};
use std::ffi::OsString;
use std::fs::{self, Metadata};
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Builder, EntryType, Header, HeaderMode};
use tokio_util::sync::CancellationToken;

const WHITEOUT_PREFIX: &str = ".wh.";

/// A computed layer blob held in memory
#[derive(Debug, Clone)]
pub struct LayerBlob {
    /// Compressed blob descriptor
    pub descriptor: Descriptor,
    /// Digest of the uncompressed tar
    pub diff_id: String,
    pub data: Bytes,
}

pub trait Differ: Send + Sync {
    /// Whether this differ can read snapshots in `layout`
    fn supports(&self, layout: SnapshotLayout) -> bool;

    /// Diff `upper` against `lower` (`None` means an empty base). Runs on a
    /// blocking thread and fails with `Cancelled` once `cancel` fires.
    fn compare(
        &self,
        lower: Option<&Path>,
        upper: &Path,
        cancel: &CancellationToken,
    ) -> Result<LayerBlob>;
}

#[derive(Debug, Clone, Default)]
pub struct WalkingDiffer;

impl WalkingDiffer {
    pub fn new() -> Self {
        Self
    }

    fn walk<W: Write>(
        &self,
        lower_root: Option<&Path>,
        upper_root: &Path,
        rel: &Path,
        builder: &mut Builder<W>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let upper_dir = upper_root.join(rel);
        let lower_dir = lower_root
            .map(|root| root.join(rel))
            .filter(|dir| fs::symlink_metadata(dir).is_ok_and(|m| m.is_dir()));

        if let Some(lower_dir) = &lower_dir {
            for name in sorted_entries(lower_dir)? {
                if fs::symlink_metadata(upper_dir.join(&name)).is_err() {
                    append_whiteout(builder, rel, &name)?;
                }
            }
        }

        for name in sorted_entries(&upper_dir)? {
            if cancel.is_cancelled() {
                return Err(PushError::Cancelled);
            }
            let rel_path = rel.join(&name);
            let upper_path = upper_root.join(&rel_path);
            let meta = fs::symlink_metadata(&upper_path)?;

            let changed = match lower_dir
                .as_ref()
                .map(|dir| dir.join(&name))
                .and_then(|path| fs::symlink_metadata(&path).ok().map(|m| (path, m)))
            {
                None => true,
                Some((lower_path, lower_meta)) => {
                    entry_changed(&lower_path, &lower_meta, &upper_path, &meta)?
                }
            };

            if meta.is_dir() {
                if changed {
                    builder.append_dir(&rel_path, &upper_path)?;
                }
                self.walk(lower_root, upper_root, &rel_path, builder, cancel)?;
            } else if changed {
                builder.append_path_with_name(&upper_path, &rel_path)?;
            }
        }
        Ok(())
    }
}

impl Differ for WalkingDiffer {
    fn supports(&self, layout: SnapshotLayout) -> bool {
        layout == SnapshotLayout::FullTree
    }

    fn compare(
        &self,
        lower: Option<&Path>,
        upper: &Path,
        cancel: &CancellationToken,
    ) -> Result<LayerBlob> {
        if !upper.is_dir() {
            return Err(PushError::NotFound(format!(
                "snapshot directory {} does not exist",
                upper.display()
            )));
        }

        let mut builder = Builder::new(Vec::new());
        builder.mode(HeaderMode::Deterministic);
        builder.follow_symlinks(false);
        self.walk(lower, upper, Path::new(""), &mut builder, cancel)?;
        let tar_bytes = builder.into_inner()?;
        let diff_id = DigestUtils::compute_docker_digest(&tar_bytes);

        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes)?;
        let data = Bytes::from(encoder.finish()?);

        let descriptor = Descriptor::new(
            MediaType::OCI_LAYER_GZIP,
            DigestUtils::compute_docker_digest(&data),
            data.len() as u64,
        );
        Ok(LayerBlob {
            descriptor,
            diff_id,
            data,
        })
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

fn append_whiteout<W: Write>(
    builder: &mut Builder<W>,
    rel: &Path,
    name: &OsString,
) -> Result<()> {
    let path = rel.join(format!("{}{}", WHITEOUT_PREFIX, name.to_string_lossy()));
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(0);
    header.set_mode(0o644);
    header.set_mtime(0);
    builder.append_data(&mut header, path, io::empty())?;
    Ok(())
}

fn entry_changed(
    lower: &Path,
    lower_meta: &Metadata,
    upper: &Path,
    upper_meta: &Metadata,
) -> Result<bool> {
    let (lt, ut) = (lower_meta.file_type(), upper_meta.file_type());
    if lt.is_dir() != ut.is_dir()
        || lt.is_symlink() != ut.is_symlink()
        || lt.is_file() != ut.is_file()
    {
        return Ok(true);
    }
    if lower_meta.permissions() != upper_meta.permissions() {
        return Ok(true);
    }
    if ut.is_symlink() {
        return Ok(fs::read_link(lower)? != fs::read_link(upper)?);
    }
    if ut.is_file() {
        if lower_meta.len() != upper_meta.len() {
            return Ok(true);
        }
        return Ok(!same_contents(lower, upper)?);
    }
    Ok(false)
}

fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    let mut fa = fs::File::open(a)?;
    let mut fb = fs::File::open(b)?;
    let mut buf_a = vec![0u8; 64 * 1024];
    let mut buf_b = vec![0u8; 64 * 1024];
    loop {
        let n = fa.read(&mut buf_a)?;
        if n == 0 {
            return Ok(fb.read(&mut buf_b[..1])? == 0);
        }
        fb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn entries(blob: &LayerBlob) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(&blob.data[..]));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let path = e.unwrap().path().unwrap().to_string_lossy().into_owned();
                path.trim_end_matches('/').to_string()
            })
            .collect()
    }

    #[test]
    fn test_base_layer_contains_everything() {
        let upper = tempfile::tempdir().unwrap();
        fs::create_dir(upper.path().join("etc")).unwrap();
        fs::write(upper.path().join("etc/hostname"), "box").unwrap();
        fs::write(upper.path().join("app"), "binary").unwrap();

        let blob = WalkingDiffer::new()
            .compare(None, upper.path(), &CancellationToken::new())
            .unwrap();
        assert_eq!(entries(&blob), vec!["app", "etc", "etc/hostname"]);
        assert_eq!(blob.descriptor.media_type, MediaType::OCI_LAYER_GZIP);
        assert_eq!(blob.descriptor.size, blob.data.len() as u64);
        assert!(DigestUtils::verify_data_integrity(&blob.data, &blob.descriptor.digest).is_ok());
    }

    #[test]
    fn test_changes_and_whiteouts() {
        let lower = tempfile::tempdir().unwrap();
        fs::create_dir(lower.path().join("etc")).unwrap();
        fs::write(lower.path().join("etc/hostname"), "box").unwrap();
        fs::write(lower.path().join("etc/motd"), "hello").unwrap();
        fs::write(lower.path().join("keep"), "same").unwrap();

        let upper = tempfile::tempdir().unwrap();
        fs::create_dir(upper.path().join("etc")).unwrap();
        fs::write(upper.path().join("etc/hostname"), "other").unwrap();
        fs::write(upper.path().join("keep"), "same").unwrap();
        fs::write(upper.path().join("new"), "file").unwrap();

        let blob = WalkingDiffer::new()
            .compare(Some(lower.path()), upper.path(), &CancellationToken::new())
            .unwrap();
        assert_eq!(
            entries(&blob),
            vec!["etc/.wh.motd", "etc/hostname", "new"]
        );
    }

    #[test]
    fn test_output_is_deterministic() {
        let upper = tempfile::tempdir().unwrap();
        fs::write(upper.path().join("a"), "1").unwrap();
        fs::write(upper.path().join("b"), "2").unwrap();

        let differ = WalkingDiffer::new();
        let cancel = CancellationToken::new();
        let first = differ.compare(None, upper.path(), &cancel).unwrap();
        let second = differ.compare(None, upper.path(), &cancel).unwrap();
        assert_eq!(first.descriptor, second.descriptor);
        assert_eq!(first.diff_id, second.diff_id);
    }

    #[test]
    fn test_cancelled_walk_stops() {
        let upper = tempfile::tempdir().unwrap();
        fs::write(upper.path().join("a"), "1").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = WalkingDiffer::new()
            .compare(None, upper.path(), &cancel)
            .unwrap_err();
        assert_eq!(err, PushError::Cancelled);
    }

    #[test]
    fn test_supports_full_tree_only() {
        let differ = WalkingDiffer::new();
        assert!(differ.supports(SnapshotLayout::FullTree));
        assert!(!differ.supports(SnapshotLayout::UpperOnly));
    }
}
