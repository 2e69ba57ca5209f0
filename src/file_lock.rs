//! OS advisory locks around JSON read-modify-write cycles.
//!
//! The lock lives on a `<file>.lock` sibling because atomic replacement swaps the
//! target's inode on every write. Locks are `flock`/`LockFileEx` based through `fs2`,
//! so they also exclude other application instances and cooperating tools.

use crate::atomic::{read_optional_blocking, write_atomic_blocking};
use crate::errors::{AppError, AppResult};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("data"));
    name.push(".lock");
    path.with_file_name(name)
}

#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Blocks until the exclusive lock for `target` is held.
    pub fn exclusive(target: &Path) -> AppResult<Self> {
        let (file, path) = open_lock_file(target)?;
        FileExt::lock_exclusive(&file).map_err(|error| {
            AppError::Lock(format!("exclusive lock on {}: {}", path.to_string_lossy(), error))
        })?;
        Ok(Self { file, path })
    }

    /// Blocks until a shared (reader) lock for `target` is held.
    pub fn shared(target: &Path) -> AppResult<Self> {
        let (file, path) = open_lock_file(target)?;
        FileExt::lock_shared(&file).map_err(|error| {
            AppError::Lock(format!("shared lock on {}: {}", path.to_string_lossy(), error))
        })?;
        Ok(Self { file, path })
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.to_string_lossy(), error = %error, "failed to release file lock");
        }
    }
}

fn open_lock_file(target: &Path) -> AppResult<(File, PathBuf)> {
    let path = lock_path(target);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| AppError::Io(error.to_string()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|error| AppError::Io(format!("open {}: {}", path.to_string_lossy(), error)))?;
    Ok((file, path))
}

fn decode<T: DeserializeOwned>(path: &Path, text: &str) -> AppResult<T> {
    serde_json::from_str(text.trim_start_matches('\u{feff}')).map_err(|error| {
        AppError::Parse(format!("{}: {}", path.to_string_lossy(), error))
    })
}

pub fn read_json_locked_blocking<T: DeserializeOwned>(path: &Path) -> AppResult<Option<T>> {
    let _guard = FileLockGuard::shared(path)?;
    match read_optional_blocking(path)? {
        Some(text) => decode(path, &text).map(Some),
        None => Ok(None),
    }
}

/// Lock, read, transform, write, unlock. The transform returns the value to persist
/// (`None` skips the write) together with a result handed back to the caller.
pub fn update_json_locked_blocking<T, R, F>(path: &Path, update: F) -> AppResult<R>
where
    T: DeserializeOwned + Serialize,
    F: FnOnce(Option<T>) -> AppResult<(Option<T>, R)>,
{
    let _guard = FileLockGuard::exclusive(path)?;
    let current = match read_optional_blocking(path)? {
        Some(text) => Some(decode(path, &text)?),
        None => None,
    };
    let (next, result) = update(current)?;
    if let Some(next) = next {
        let bytes = serde_json::to_vec_pretty(&next)?;
        write_atomic_blocking(path, &bytes)?;
    }
    Ok(result)
}

pub async fn read_json_locked<T>(path: PathBuf) -> AppResult<Option<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || read_json_locked_blocking(&path)).await?
}

pub async fn update_json_locked<T, R, F>(path: PathBuf, update: F) -> AppResult<R>
where
    T: DeserializeOwned + Serialize + Send + 'static,
    R: Send + 'static,
    F: FnOnce(Option<T>) -> AppResult<(Option<T>, R)> + Send + 'static,
{
    tokio::task::spawn_blocking(move || update_json_locked_blocking(&path, update)).await?
}
