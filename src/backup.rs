use crate::datasets::{backup_filenames, BACKUP_DIR};
use crate::errors::{AppError, AppResult};
use chrono::{Local, NaiveDateTime, TimeDelta};
use std::path::{Path, PathBuf};

pub const RETENTION_DAYS: i64 = 30;

const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const STAMP_LEN: usize = 19;

/// Timestamped copies of the data root under `<root>/backups`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
    backup_dir: PathBuf,
    retention: TimeDelta,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            backup_dir: root.join(BACKUP_DIR),
            root,
            retention: TimeDelta::days(RETENTION_DAYS),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copies every known data file into a new folder, then prunes expired folders.
    /// Missing sources are expected and skipped; other copy failures are logged and the
    /// backup carries on.
    pub async fn backup_now(&self, tag: Option<&str>) -> AppResult<PathBuf> {
        let now = Local::now().naive_local();
        let folder = self.backup_dir.join(folder_name(now, tag));
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|error| AppError::Io(format!("create {}: {}", folder.to_string_lossy(), error)))?;

        let mut copied = 0usize;
        for name in backup_filenames() {
            let source = self.root.join(name);
            match tokio::fs::copy(&source, folder.join(name)).await {
                Ok(_) => copied += 1,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(source = %source.to_string_lossy(), error = %error, "backup copy failed");
                }
            }
        }
        tracing::info!(folder = %folder.to_string_lossy(), files = copied, "backup created");

        if let Err(error) = self.prune_older_than(now).await {
            tracing::warn!(error = %error, "backup pruning failed");
        }
        Ok(folder)
    }

    /// Removes backup folders whose leading timestamp is older than the retention window.
    /// Folders whose names do not start with a timestamp are never touched.
    pub async fn prune_older_than(&self, now: NaiveDateTime) -> AppResult<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(AppError::Io(error.to_string())),
        };

        let mut removed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| AppError::Io(error.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stamp) = parse_stamp(&name) else {
                continue;
            };
            if now - stamp <= self.retention || !entry.path().is_dir() {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed.push(entry.path()),
                Err(error) => {
                    tracing::warn!(folder = %name, error = %error, "failed to remove expired backup");
                }
            }
        }
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "expired backups pruned");
        }
        Ok(removed)
    }
}

fn folder_name(now: NaiveDateTime, tag: Option<&str>) -> String {
    let stamp = now.format(STAMP_FORMAT).to_string();
    let tag = tag
        .map(|tag| {
            tag.trim()
                .chars()
                .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '-' })
                .collect::<String>()
        })
        .filter(|tag| !tag.is_empty());
    match tag {
        Some(tag) => format!("{}_{}", stamp, tag),
        None => stamp,
    }
}

fn parse_stamp(name: &str) -> Option<NaiveDateTime> {
    let prefix = name.get(..STAMP_LEN)?;
    NaiveDateTime::parse_from_str(prefix, STAMP_FORMAT).ok()
}
