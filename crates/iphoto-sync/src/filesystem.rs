//! Filesystem side of the download path
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: every download streams into a `.part` file in the
//!   album directory and is renamed to its final name only once complete,
//!   so outside readers never observe a partial photo.
//! - **Stale part cleanup**: `.part` files surviving a crash are removed
//!   at the start of each album reconcile.
//! - **Size verification**: when the remote listing advertised a size,
//!   a short stream is rejected as truncated and the temp file removed.
//! - **Disk-full promotion**: an out-of-space failure from the write or
//!   the final rename surfaces as [`DiskFull`]; the engine aborts the
//!   cycle on it, while every other IO failure stays per-photo.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use iphoto_core::ports::cloud_session::{ByteStream, CloudError};

/// A write that failed because the volume ran out of space.
///
/// Not a per-photo condition: the engine treats this as fatal for the
/// cycle instead of counting it toward the consecutive-failure cutoff.
#[derive(Debug, Error)]
#[error("Disk full while writing {path}: {source}")]
pub struct DiskFull {
    /// Path being written when the volume filled up
    pub path: PathBuf,
    /// The underlying IO error
    #[source]
    pub source: std::io::Error,
}

/// Suffix for in-flight download files.
const PART_SUFFIX: &str = ".part";

/// Creates the album directory under the sync root if needed.
pub fn ensure_album_dir(sync_root: &Path, album_dir: &str) -> std::io::Result<PathBuf> {
    let path = sync_root.join(album_dir);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Removes `.part` leftovers from a previous crash in one album directory.
pub fn clean_stale_parts(album_path: &Path) {
    let Ok(entries) = std::fs::read_dir(album_path) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(PART_SUFFIX))
            .unwrap_or(false);
        if is_part {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale partial download"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove stale partial"),
            }
        }
    }
}

/// Streams a download into `<album_path>/<filename>` atomically.
///
/// Returns the number of bytes written. On any failure the temp file is
/// removed and the final path untouched.
pub async fn write_stream_atomic(
    album_path: &Path,
    filename: &str,
    mut stream: ByteStream,
    expected_size: Option<u64>,
) -> anyhow::Result<u64> {
    let final_path = album_path.join(filename);
    let temp_path = album_path.join(format!("{}{}", filename, PART_SUFFIX));

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| classify_io(e, &temp_path))?;
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| classify_io(e, &temp_path))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| classify_io(e, &temp_path))?;
        drop(file);

        if let Some(expected) = expected_size {
            if expected > 0 && written != expected {
                return Err(CloudError::Truncated {
                    expected,
                    actual: written,
                }
                .into());
            }
        }

        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| classify_io(e, &final_path))?;
        Ok::<u64, anyhow::Error>(written)
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    result
}

/// Classifies an IO failure from the download write path.
///
/// Out-of-space conditions become [`DiskFull`]; everything else passes
/// through unchanged.
fn classify_io(err: std::io::Error, path: &Path) -> anyhow::Error {
    if is_disk_full(&err) {
        DiskFull {
            path: path.to_path_buf(),
            source: err,
        }
        .into()
    } else {
        err.into()
    }
}

#[cfg(unix)]
fn is_disk_full(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}

#[cfg(not(unix))]
fn is_disk_full(err: &std::io::Error) -> bool {
    // ERROR_HANDLE_DISK_FULL (39) / ERROR_DISK_FULL (112)
    matches!(err.raw_os_error(), Some(39) | Some(112))
}

/// Whether the photo already on disk satisfies the remote listing.
///
/// An unknown remote size (0) degrades to a pure existence check.
pub fn local_file_matches(sync_root: &Path, relpath: &str, expected_size: u64) -> bool {
    let path = sync_root.join(relpath);
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => expected_size == 0 || meta.len() == expected_size,
        _ => false,
    }
}

/// Whether any file exists at the tracked relative path.
pub fn local_file_exists(sync_root: &Path, relpath: &str) -> bool {
    sync_root.join(relpath).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::TempDir;

    fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(Ok::<_, CloudError>).collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_write_stream_atomic_happy_path() {
        let dir = TempDir::new().unwrap();
        let written = write_stream_atomic(
            dir.path(),
            "IMG_1.JPG",
            byte_stream(vec![vec![1u8; 512], vec![2u8; 512]]),
            Some(1024),
        )
        .await
        .unwrap();

        assert_eq!(written, 1024);
        let final_path = dir.path().join("IMG_1.JPG");
        assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 1024);
        assert!(!dir.path().join("IMG_1.JPG.part").exists());
    }

    #[tokio::test]
    async fn test_short_stream_is_rejected_and_cleaned() {
        let dir = TempDir::new().unwrap();
        let result = write_stream_atomic(
            dir.path(),
            "IMG_1.JPG",
            byte_stream(vec![vec![1u8; 100]]),
            Some(1024),
        )
        .await;

        assert!(result.is_err());
        assert!(!dir.path().join("IMG_1.JPG").exists());
        assert!(!dir.path().join("IMG_1.JPG.part").exists());
    }

    #[tokio::test]
    async fn test_unknown_size_accepts_any_length() {
        let dir = TempDir::new().unwrap();
        let written = write_stream_atomic(
            dir.path(),
            "IMG_1.JPG",
            byte_stream(vec![vec![1u8; 100]]),
            Some(0),
        )
        .await
        .unwrap();
        assert_eq!(written, 100);
        assert!(dir.path().join("IMG_1.JPG").exists());
    }

    #[tokio::test]
    async fn test_failing_stream_cleans_temp() {
        let dir = TempDir::new().unwrap();
        let failing: ByteStream = Box::pin(stream::iter(vec![
            Ok(vec![1u8; 10]),
            Err(CloudError::ServiceUnavailable("connection reset".into())),
        ]));

        let result = write_stream_atomic(dir.path(), "IMG_1.JPG", failing, Some(1024)).await;
        assert!(result.is_err());
        assert!(!dir.path().join("IMG_1.JPG").exists());
        assert!(!dir.path().join("IMG_1.JPG.part").exists());
    }

    #[test]
    fn test_clean_stale_parts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg.part"), b"junk").unwrap();
        std::fs::write(dir.path().join("keep.jpg"), b"photo").unwrap();

        clean_stale_parts(dir.path());

        assert!(!dir.path().join("a.jpg.part").exists());
        assert!(dir.path().join("keep.jpg").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_enospc_is_classified_as_disk_full() {
        let err = std::io::Error::from_raw_os_error(libc::ENOSPC);
        let wrapped = classify_io(err, Path::new("/photos/Trip/IMG_1.JPG.part"));
        assert!(wrapped.downcast_ref::<DiskFull>().is_some());
    }

    #[test]
    fn test_other_io_errors_stay_plain() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let wrapped = classify_io(err, Path::new("/photos/Trip/IMG_1.JPG.part"));
        assert!(wrapped.downcast_ref::<DiskFull>().is_none());
    }

    #[test]
    fn test_local_file_matches_size() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Trip")).unwrap();
        std::fs::write(dir.path().join("Trip/IMG_1.JPG"), vec![0u8; 1024]).unwrap();

        assert!(local_file_matches(dir.path(), "Trip/IMG_1.JPG", 1024));
        assert!(!local_file_matches(dir.path(), "Trip/IMG_1.JPG", 2048));
        // Unknown size: presence suffices.
        assert!(local_file_matches(dir.path(), "Trip/IMG_1.JPG", 0));
        assert!(!local_file_matches(dir.path(), "Trip/missing.jpg", 0));
    }
}
