//! Crash-safe file persistence
//!
//! Every file this crate writes (the subscription config, per-subscription result
//! sets, exported envelopes) goes through [`write_resilient`]. The previous file is
//! renamed to a `.bak` sibling before the new bytes are written and is put back if
//! the write fails, so a crash mid-write always leaves one complete copy on disk.
//!
//! A `.bak` sibling only outlives a write that never finished. While it exists
//! it is the authoritative copy and the primary is treated as partial.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Path of the backup sibling for `path` (`name.ext` -> `name.ext.bak`)
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".bak");
    path.with_file_name(name)
}

/// Write `data` to `path`, keeping the previous contents recoverable.
///
/// # Errors
///
/// Returns the underlying IO error. When the write itself fails the previous
/// file has already been restored.
pub async fn write_resilient(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let backup = backup_path(path);
    let had_previous = if tokio::fs::try_exists(&backup).await? {
        // an earlier write was interrupted; the backup is the good copy
        tracing::warn!("discarding partial {:?}, keeping backup", path);
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        true
    } else {
        let exists = tokio::fs::try_exists(path).await?;
        if exists {
            tokio::fs::rename(path, &backup).await?;
        }
        exists
    };

    match write_all(path, data).await {
        Ok(()) => {
            if had_previous {
                if let Err(e) = tokio::fs::remove_file(&backup).await {
                    tracing::debug!("failed to remove backup {:?}: {}", backup, e);
                }
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!("write of {:?} failed, restoring backup: {}", path, e);
            let _ = tokio::fs::remove_file(path).await;
            if had_previous {
                tokio::fs::rename(&backup, path).await?;
            }
            Err(e)
        }
    }
}

async fn write_all(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Read a file written by [`write_resilient`].
///
/// The backup sibling wins whenever it exists: a crash after the rename leaves
/// the primary missing or truncated next to it. Returns `Ok(None)` when
/// neither exists.
pub async fn read_resilient(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let backup = backup_path(path);
    match tokio::fs::read(&backup).await {
        Ok(data) => {
            tracing::warn!("recovered {:?} from backup", path);
            return Ok(Some(data));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file and any backup sibling, ignoring missing files.
pub async fn remove_resilient(path: &Path) -> io::Result<()> {
    for p in [path.to_path_buf(), backup_path(path)] {
        match tokio::fs::remove_file(&p).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_replaces_and_drops_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.json");

        write_resilient(&path, b"one").await.unwrap();
        write_resilient(&path, b"two").await.unwrap();

        assert_eq!(read_resilient(&path).await.unwrap().unwrap(), b"two");
        assert!(!backup_path(&path).exists());
    }

    #[tokio::test]
    async fn test_read_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results").join("abc.json");

        write_resilient(&path, b"kept").await.unwrap();
        std::fs::rename(&path, backup_path(&path)).unwrap();

        assert_eq!(read_resilient(&path).await.unwrap().unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_interrupted_write_recovers_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.json");
        let good = br#"{"good": true}"#;

        write_resilient(&path, good).await.unwrap();
        // crash after the rename, part way through writing the new copy
        std::fs::rename(&path, backup_path(&path)).unwrap();
        std::fs::write(&path, b"{\"go").unwrap();

        assert_eq!(read_resilient(&path).await.unwrap().unwrap(), good);

        // the next write must not replace the good backup with the partial file
        write_resilient(&path, b"next").await.unwrap();
        assert_eq!(read_resilient(&path).await.unwrap().unwrap(), b"next");
        assert!(!backup_path(&path).exists());
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nothing.json");
        assert!(read_resilient(&path).await.unwrap().is_none());
        remove_resilient(&path).await.unwrap();
    }

    #[test]
    fn test_backup_path_appends_suffix() {
        let p = backup_path(Path::new("/tmp/x/results.json"));
        assert_eq!(p, PathBuf::from("/tmp/x/results.json.bak"));
    }
}
