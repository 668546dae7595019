use std::path::Path;

use fsbroker_core::{DirEntryInfo, DirEntryKind, ListOk, ListRequest, Response};
use fsbroker_error::{ErrorCode, OpError};

use crate::actor::ServiceCtx;

/// LIST: directory enumeration with a glob filter over entry base names
/// and optional registry-hash attachment. Recursive listings report
/// names relative to the listed directory.
pub(crate) async fn run(ctx: &ServiceCtx, req: ListRequest) -> Response<ListOk> {
    match list_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

fn modified_timestamp(meta: &std::fs::Metadata) -> Option<String> {
    meta.modified()
        .ok()
        .map(|mtime| chrono::DateTime::<chrono::Utc>::from(mtime).to_rfc3339())
}

async fn list_inner(ctx: &ServiceCtx, req: &ListRequest) -> Result<Response<ListOk>, OpError> {
    let validated = ctx.validate(&req.path)?;

    let meta = tokio::fs::metadata(&validated).await.map_err(|_| {
        OpError::new(
            ErrorCode::DirNotFound,
            format!("Directory not found: {}", req.path.display()),
        )
        .with_path(&req.path)
    })?;
    if !meta.is_dir() {
        return Err(OpError::new(
            ErrorCode::DirNotFound,
            format!("Path is not a directory: {}", req.path.display()),
        )
        .with_path(&req.path));
    }

    let pattern = glob::Pattern::new(&req.pattern).map_err(|e| {
        OpError::server(format!("Invalid glob pattern '{}': {e}", req.pattern))
            .with_path(&req.path)
    })?;
    let match_all = req.pattern == "*";

    let mut entries = Vec::new();
    let mut pending_dirs = vec![validated.clone()];

    while let Some(dir) = pending_dirs.pop() {
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) => {
                if dir == validated {
                    return Err(OpError::server(format!("Failed to list directory: {e}"))
                        .with_path(&req.path));
                }
                tracing::debug!("skipping unreadable subdirectory {}: {e}", dir.display());
                continue;
            }
        };

        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("stopped reading {}: {e}", dir.display());
                    break;
                }
            };
            let entry_path = entry.path();
            let Ok(entry_meta) = tokio::fs::symlink_metadata(&entry_path).await else {
                continue;
            };
            let base_name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry_meta.is_dir();

            if is_dir && req.recursive {
                pending_dirs.push(entry_path.clone());
            }

            if !match_all && !pattern.matches(&base_name) {
                continue;
            }

            let name = display_name(&validated, &entry_path, &base_name, req.recursive);
            if is_dir {
                entries.push(DirEntryInfo {
                    name,
                    kind: DirEntryKind::Directory,
                    size_bytes: None,
                    modified: modified_timestamp(&entry_meta),
                    hash: None,
                });
            } else {
                let hash = req
                    .include_hashes
                    .then(|| ctx.registry.get(&entry_path))
                    .flatten();
                entries.push(DirEntryInfo {
                    name,
                    kind: DirEntryKind::File,
                    size_bytes: Some(entry_meta.len()),
                    modified: modified_timestamp(&entry_meta),
                    hash,
                });
            }
        }

        if !req.recursive {
            break;
        }
    }

    Ok(Response::Ok(ListOk {
        path: validated,
        total_entries: entries.len(),
        entries,
        pattern: req.pattern.clone(),
        recursive: req.recursive,
        timestamp: fsbroker_core::utc_timestamp(),
    }))
}

fn display_name(root: &Path, entry_path: &Path, base_name: &str, recursive: bool) -> String {
    if recursive {
        entry_path
            .strip_prefix(root)
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|_| base_name.to_string())
    } else {
        base_name.to_string()
    }
}
