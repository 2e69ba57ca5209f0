use crate::codec::with_bom;
use crate::errors::{AppError, AppResult};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// `<path>.tmp`, the sibling every atomic write stages into.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("data"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replaces `path` with `content` via a fully written temp sibling and a rename.
pub async fn write_atomic(path: &Path, content: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| AppError::Io(error.to_string()))?;
    }
    let tmp = temp_path(path);
    let staged = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(content).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(error) = staged {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp.to_string_lossy(), error = %cleanup, "failed to remove temp file");
            }
        }
        return Err(AppError::Io(format!(
            "atomic write of {} failed: {}",
            path.to_string_lossy(),
            error
        )));
    }
    Ok(())
}

/// Atomic write for CSV text; the UTF-8 BOM is prepended unless already present.
pub async fn write_csv_atomic(path: &Path, text: &str) -> AppResult<()> {
    write_atomic(path, with_bom(text).as_bytes()).await
}

/// Blocking variant used inside lock-holding worker threads.
pub fn write_atomic_blocking(path: &Path, content: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| AppError::Io(error.to_string()))?;
    }
    let tmp = temp_path(path);
    let staged = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, path)
    })();

    if let Err(error) = staged {
        let _ = std::fs::remove_file(&tmp);
        return Err(AppError::Io(format!(
            "atomic write of {} failed: {}",
            path.to_string_lossy(),
            error
        )));
    }
    Ok(())
}

/// Reads a text file; `Ok(None)` when it does not exist, `Err` on any other failure.
pub async fn read_optional(path: &Path) -> AppResult<Option<String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(AppError::Io(format!(
            "failed to read {}: {}",
            path.to_string_lossy(),
            error
        ))),
    }
}

pub fn read_optional_blocking(path: &Path) -> AppResult<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(AppError::Io(format!(
            "failed to read {}: {}",
            path.to_string_lossy(),
            error
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_file_and_leaves_no_temp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contacts.csv");
        std::fs::write(&path, "old").expect("seed");

        write_csv_atomic(&path, "Name,Email\n").await.expect("write");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(bytes, "\u{feff}Name,Email\n".as_bytes());
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn bom_is_not_duplicated_on_resave() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("servers.csv");
        write_csv_atomic(&path, "\u{feff}Name\n").await.expect("write");
        let text = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(text.matches('\u{feff}').count(), 1);
    }

    #[tokio::test]
    async fn failed_write_keeps_original() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contacts.csv");
        std::fs::write(&path, "original").expect("seed");
        // A directory squatting on the temp name makes staging fail before the rename.
        std::fs::create_dir(temp_path(&path)).expect("block temp");

        let result = write_atomic(&path, b"replacement").await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "original");
    }

    #[tokio::test]
    async fn read_optional_distinguishes_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = read_optional(&dir.path().join("nope.csv")).await.expect("missing is ok");
        assert!(missing.is_none());
        // Reading a directory is an I/O failure, not "absent".
        assert!(read_optional(dir.path()).await.is_err());
    }

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/data/contacts.json")),
            PathBuf::from("/data/contacts.json.tmp")
        );
    }
}
