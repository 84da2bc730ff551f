//! File helpers: content comparison, atomic replacement, directory fsync.
//!
//! Boot configuration must never be observed half written, so every write
//! goes through a temporary file in the target directory that is fsynced and
//! then renamed over the destination.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{IoContext, Result};

/// SHA-256 of a file's contents, or None if it cannot be read.
pub fn hash_file(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).ok()?;
    Some(format!("{:x}", hasher.finalize()))
}

/// True if both files exist and have identical contents.
pub fn files_match(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) if ma.len() != mb.len() => return false,
        (Ok(_), Ok(_)) => {}
        _ => return false,
    }
    match (hash_file(a), hash_file(b)) {
        (Some(ha), Some(hb)) => ha == hb,
        _ => false,
    }
}

/// Read a text file, returning None if it does not exist or is unreadable.
pub fn read_text(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

/// Atomically replace `path` with `content`.
///
/// Parent directories are created as needed.
pub fn write_atomic<C: AsRef<[u8]>>(path: &Path, content: C, mode: u32) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent)
        .io_context(|| format!("Failed to create {}", parent.display()))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .io_context(|| format!("Failed to create temporary file in {}", parent.display()))?;
    tmp.write_all(content.as_ref())
        .io_context(|| format!("Failed to write {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .io_context(|| format!("Failed to sync {}", path.display()))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .io_context(|| format!("Failed to set permissions on {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .io_context(|| format!("Failed to replace {}", path.display()))?;

    sync_dir(parent);
    Ok(())
}

/// Atomically copy `src` over `dst`.
pub fn copy_atomic(src: &Path, dst: &Path, mode: u32) -> Result<()> {
    let parent = parent_dir(dst);
    fs::create_dir_all(parent)
        .io_context(|| format!("Failed to create {}", parent.display()))?;

    let mut input =
        File::open(src).io_context(|| format!("Failed to open {}", src.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .io_context(|| format!("Failed to create temporary file in {}", parent.display()))?;
    io::copy(&mut input, tmp.as_file_mut())
        .io_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    tmp.as_file()
        .sync_all()
        .io_context(|| format!("Failed to sync {}", dst.display()))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .io_context(|| format!("Failed to set permissions on {}", dst.display()))?;
    tmp.persist(dst)
        .map_err(|e| e.error)
        .io_context(|| format!("Failed to replace {}", dst.display()))?;

    sync_dir(parent);
    Ok(())
}

/// Copy `src` to `dst` only when the contents differ.
///
/// Returns true if a copy was performed.
pub fn copy_if_changed(src: &Path, dst: &Path, mode: u32) -> Result<bool> {
    if files_match(src, dst) {
        return Ok(false);
    }
    copy_atomic(src, dst, mode)?;
    Ok(true)
}

/// Remove a file if it exists.
///
/// Returns true if something was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).io_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

// Best effort: the rename is already durable on most filesystems.
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
