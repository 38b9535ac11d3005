//! Local read-only snapshots of a repository.
//!
//! Closed containers are immutable, so they are hard-linked; their indexes
//! and the redb files are copied. The snapshot is built next to `dst`, loses
//! every write bit, and is renamed into place once complete. The source's
//! writer lock is held throughout so no commit lands mid-copy.

use crate::block_file::{FAI_SUFFIX, GZI_SUFFIX};
use crate::db;
use crate::error::{Error, Result};
use crate::repo::LOCK_FILE;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub linked: u64,
    pub copied: u64,
    pub dirs: u64,
}

/// Snapshot the repository at `src` into the new directory `dst`.
pub fn snapshot(src: &Path, dst: &Path) -> Result<SnapshotStats> {
    let src = src.canonicalize()?;
    if dst.exists() {
        return Err(Error::AlreadyExists(dst.to_path_buf()));
    }
    let dst = absolute_parent(dst)?;
    if dst.starts_with(&src) {
        return Err(Error::InvalidArgument(format!(
            "cannot nest a snapshot ({}) inside its source ({})",
            dst.display(),
            src.display()
        )));
    }
    // a snapshot used as a source has no lock file and no writer
    let lock_path = src.join(LOCK_FILE);
    let _lock = match lock_path.is_file() {
        true => Some(db::lock_exclusive(&lock_path)?),
        false => None,
    };

    let mut tmp = OsString::from(dst.as_os_str());
    tmp.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp);
    fs::create_dir(&tmp)?;
    debug!(src = %src.display(), tmp = %tmp.display(), "building snapshot");

    let stats = match populate(&src, &tmp) {
        Ok(stats) => stats,
        Err(e) => {
            let _ = fs::remove_dir_all(&tmp);
            return Err(e);
        }
    };
    drop_write(&tmp)?;
    fs::rename(&tmp, &dst)?;

    info!(
        dst = %dst.display(),
        linked = stats.linked,
        copied = stats.copied,
        dirs = stats.dirs,
        "snapshot created"
    );
    Ok(stats)
}

fn populate(src: &Path, tmp: &Path) -> Result<SnapshotStats> {
    let mut stats = SnapshotStats::default();
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let out = tmp.join(rel);
        let name = entry.file_name().to_string_lossy();

        if entry.file_type().is_dir() {
            fs::create_dir(&out)?;
            stats.dirs += 1;
        } else if name == LOCK_FILE {
            continue;
        } else if name.ends_with(".bgz") {
            fs::hard_link(entry.path(), &out)?;
            stats.linked += 1;
        } else if is_index(&name) {
            fs::copy(entry.path(), &out)?;
            stats.copied += 1;
        } else {
            debug!(path = %entry.path().display(), "not part of a repository; skipped");
        }
    }
    Ok(stats)
}

fn is_index(name: &str) -> bool {
    name.ends_with(FAI_SUFFIX) || name.ends_with(GZI_SUFFIX) || name.ends_with(".redb")
}

/// Clear write bits below `root`, children before parents.
fn drop_write(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let mut perms = entry.metadata().map_err(|e| Error::Io(e.into()))?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(entry.path(), perms)?;
    }
    Ok(())
}

// `canonicalize` needs the path to exist; resolve the parent instead.
fn absolute_parent(p: &Path) -> Result<PathBuf> {
    let name = p
        .file_name()
        .ok_or_else(|| Error::InvalidArgument(format!("bad snapshot path {}", p.display())))?;
    let parent = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.canonicalize()?,
        _ => std::env::current_dir()?,
    };
    Ok(parent.join(name))
}
