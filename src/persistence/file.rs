//! Crash-safe file-backed key-value store.
//!
//! Each key maps to `<root>/<key>.json`. Keys may contain `/`, which become
//! subdirectories (`shard-12/seen-ids` ⇒ `<root>/shard-12/seen-ids.json`).
//!
//! # Atomic Writes
//!
//! 1. Write to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename over `<path>`
//! 4. fsync the parent directory
//!
//! Readers therefore see either the previous record or the new one, never a
//! partial write. Blocking I/O runs on tokio's blocking pool.

use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::trace;

use super::fsync::{fsync_dir, fsync_file};
use super::{Result, StateStore, StoreError};

/// Stores records as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path for a key, rejecting keys that escape the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut path = self.root.join(relative);
        path.as_mut_os_string().push(".json");
        Ok(path)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        let path = self.path_for(key);
        async move {
            let path = path?;
            trace!(path = %path.display(), "Reading record");
            let bytes = tokio::task::spawn_blocking(move || read_optional(&path)).await??;
            Ok(bytes)
        }
    }

    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
        let path = self.path_for(key);
        async move {
            let path = path?;
            trace!(path = %path.display(), bytes = value.len(), "Writing record");
            tokio::task::spawn_blocking(move || write_atomic(&path, &value)).await??;
            Ok(())
        }
    }
}
