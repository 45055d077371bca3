//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors and keep the
//! recording file lifecycle (`.part` finalization) and atomic config writes
//! in one place.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::utils::filename::final_path;
use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Write `contents` to `path` through a temporary file and rename, so readers
/// never observe a partially written file.
pub fn write_atomic_sync(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, contents).map_err(|e| io_error("writing temporary file", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error("replacing file", path, e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Size of a file in bytes, 0 when it does not exist.
pub async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Finish a recording: rename a non-empty `.part` file to its final name or
/// delete it when empty.
///
/// Returns the final path when a file was kept.
pub async fn finalize_recording(part_path: &Path) -> Result<Option<PathBuf>> {
    let size = match tokio::fs::metadata(part_path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %part_path.display(), "No output file to finalize");
            return Ok(None);
        }
        Err(e) => return Err(io_error("reading recording metadata", part_path, e)),
    };

    if size == 0 {
        warn!(path = %part_path.display(), "Removing empty recording");
        tokio::fs::remove_file(part_path)
            .await
            .map_err(|e| io_error("removing empty recording", part_path, e))?;
        return Ok(None);
    }

    let target = final_path(part_path);
    if target == part_path {
        return Ok(Some(target));
    }
    tokio::fs::rename(part_path, &target)
        .await
        .map_err(|e| io_error("renaming recording", part_path, e))?;
    info!(path = %target.display(), size, "Recording saved");
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finalize_renames_non_empty_part() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("rec.ts.part");
        tokio::fs::write(&part, b"data").await.unwrap();

        let finished = finalize_recording(&part).await.unwrap();
        assert_eq!(finished, Some(dir.path().join("rec.ts")));
        assert!(!part.exists());
        assert!(dir.path().join("rec.ts").exists());
    }

    #[tokio::test]
    async fn test_finalize_removes_empty_part() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("rec.ts.part");
        tokio::fs::write(&part, b"").await.unwrap();

        assert_eq!(finalize_recording(&part).await.unwrap(), None);
        assert!(!part.exists());
        assert!(!dir.path().join("rec.ts").exists());
    }

    #[tokio::test]
    async fn test_finalize_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("missing.ts.part");
        assert_eq!(finalize_recording(&part).await.unwrap(), None);
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        write_atomic_sync(&path, b"first").unwrap();
        write_atomic_sync(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_ensure_dir_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let err = ensure_dir_all_with_op("creating output directory", &file.join("sub"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("creating output directory"));
    }
}
