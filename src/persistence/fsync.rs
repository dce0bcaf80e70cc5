//! fsync helpers for the file store.
//!
//! A rename only survives power loss once the parent directory entry is
//! synced, so the atomic write path syncs both the temp file and the
//! directory it was renamed in.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Flushes a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flushes a directory's entries to disk.
///
/// Callers should only pass directories.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
