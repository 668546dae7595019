/*!
Atomic file I/O with durability guarantees.

- `atomic_write`: temp file in the target's parent directory (same
  filesystem), write + fsync, close, rename over the target, then fsync the
  parent directory so the new directory entry survives a crash.
- `safe_rename`: atomic rename when source and destination share a device;
  copy + fsync + unlink fallback across filesystems.

On Windows the rename step retries on transient permission errors
(antivirus / indexing holds) with ~50/100/200 ms backoff. Any failure after
temp-file creation removes the temp file before the error propagates.
*/

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::errors::IoError;

#[cfg(windows)]
const RENAME_RETRY_DELAYS_MS: [u64; 3] = [50, 100, 200];

async fn rename_with_retry(src: &Path, dst: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    {
        let mut last_err = None;
        for delay_ms in RENAME_RETRY_DELAYS_MS {
            match tokio::fs::rename(src, dst).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| std::io::Error::other("rename retries exhausted")))
    }
    #[cfg(not(windows))]
    {
        tokio::fs::rename(src, dst).await
    }
}

/// Best-effort fsync of the parent directory so the rename's directory
/// entry is durable. A no-op on Windows and on filesystems that refuse
/// directory fsync.
async fn fsync_parent_dir(path: &Path) {
    #[cfg(windows)]
    {
        let _ = path;
    }
    #[cfg(not(windows))]
    {
        let Some(parent) = path.parent().map(Path::to_path_buf) else {
            return;
        };
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(dir) = std::fs::File::open(&parent) {
                if let Err(e) = dir.sync_all() {
                    tracing::trace!(target: "fsbroker-io", "parent fsync skipped for {}: {e}", parent.display());
                }
            }
        })
        .await;
    }
}

fn temp_path_for(target: &Path) -> Result<PathBuf, IoError> {
    let parent = target.parent().ok_or_else(|| {
        IoError::file_op(
            "write",
            target,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "file has no parent directory",
            ),
        )
    })?;
    Ok(parent.join(format!(".fsbroker-{}.tmp", Uuid::new_v4())))
}

/// Writes `bytes` to `target` atomically and durably. Callers supply bytes;
/// string encoding is their concern.
pub async fn atomic_write(target: &Path, bytes: &[u8]) -> Result<(), IoError> {
    let tmp_path = temp_path_for(target)?;

    let write_result: Result<(), IoError> = async {
        {
            let mut f = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| IoError::file_op("write", &tmp_path, e))?;
            f.write_all(bytes)
                .await
                .map_err(|e| IoError::file_op("write", &tmp_path, e))?;
            f.flush()
                .await
                .map_err(|e| IoError::file_op("write", &tmp_path, e))?;
            f.sync_all()
                .await
                .map_err(|e| IoError::file_op("sync", &tmp_path, e))?;
            // File handle closes here; Windows refuses to rename an open file.
        }

        rename_with_retry(&tmp_path, target)
            .await
            .map_err(|e| IoError::file_op("write", target, e))?;

        fsync_parent_dir(target).await;
        Ok(())
    }
    .await;

    if write_result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    write_result
}

#[cfg(unix)]
fn same_device(src_meta: &std::fs::Metadata, dst_meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    src_meta.dev() == dst_meta.dev()
}

#[cfg(not(unix))]
fn same_device(_src_meta: &std::fs::Metadata, _dst_meta: &std::fs::Metadata) -> bool {
    // Without device ids, attempt the rename and let the error drive the
    // fallback in `safe_rename`.
    true
}

/// Moves `src` to `dst`. Returns `true` when the cross-filesystem fallback
/// (copy + fsync + unlink) was taken, `false` for a plain atomic rename.
pub async fn safe_rename(src: &Path, dst: &Path) -> Result<bool, IoError> {
    let src_meta = tokio::fs::metadata(src)
        .await
        .map_err(|e| IoError::file_op("rename", src, e))?;
    let dst_dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let dst_dir_meta = tokio::fs::metadata(dst_dir)
        .await
        .map_err(|e| IoError::file_op("rename", dst_dir, e))?;

    if same_device(&src_meta, &dst_dir_meta) {
        match rename_with_retry(src, dst).await {
            Ok(()) => {
                fsync_parent_dir(dst).await;
                return Ok(false);
            }
            // EXDEV can still surface here when device ids were unavailable.
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {}
            Err(e) => return Err(IoError::file_op("rename", src, e)),
        }
    }

    copy_across_filesystems(src, dst).await?;
    Ok(true)
}

async fn copy_across_filesystems(src: &Path, dst: &Path) -> Result<(), IoError> {
    tokio::fs::copy(src, dst)
        .await
        .map_err(|e| IoError::file_op("copy", src, e))?;

    let dst_file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(dst)
        .await
        .map_err(|e| IoError::file_op("sync", dst, e))?;
    dst_file
        .sync_all()
        .await
        .map_err(|e| IoError::file_op("sync", dst, e))?;
    drop(dst_file);

    fsync_parent_dir(dst).await;

    tokio::fs::remove_file(src)
        .await
        .map_err(|e| IoError::file_op("delete", src, e))?;
    Ok(())
}
