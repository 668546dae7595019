use fsbroker_core::{AppendOk, AppendRequest, Response};
use fsbroker_error::{ErrorCode, OpError};
use tokio::io::AsyncWriteExt;

use crate::access::MutatingOp;
use crate::actor::ServiceCtx;
use crate::text::encode_text;
use crate::watcher::FileEventKind;

/// APPEND: extend a file in place under an exclusive lock. The separator
/// goes between the existing tail and the new content only; an empty file
/// (or empty separator) gets the content alone.
pub(crate) async fn run(ctx: &ServiceCtx, req: AppendRequest) -> Response<AppendOk> {
    match append_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

async fn append_inner(ctx: &ServiceCtx, req: &AppendRequest) -> Result<Response<AppendOk>, OpError> {
    let validated = ctx.validate_mutating(&req.path, MutatingOp::Write)?;

    let file_existed = validated.exists();
    if !file_existed {
        if !req.create_if_missing {
            return Err(OpError::new(
                ErrorCode::FileNotFound,
                format!("File not found: {}", req.path.display()),
            )
            .with_path(&req.path));
        }
        if req.create_dirs {
            if let Some(parent) = validated.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    OpError::new(
                        ErrorCode::WriteError,
                        format!("Failed to create parent directories: {e}"),
                    )
                    .with_path(&req.path)
                })?;
            }
        }
        tokio::fs::File::create(&validated).await.map_err(|e| {
            OpError::new(ErrorCode::WriteError, format!("Failed to create file: {e}"))
                .with_path(&req.path)
        })?;
    }

    let timeout = ctx.effective_timeout(req.timeout);
    let _guard = ctx.acquire_write(&validated, timeout).await?;

    let size_before = tokio::fs::metadata(&validated)
        .await
        .map(|m| m.len())
        .map_err(|e| {
            OpError::server(format!("Failed to stat file: {e}")).with_path(&req.path)
        })?;
    let is_empty = size_before == 0;

    let content_to_append = if is_empty || req.separator.is_empty() {
        req.content.clone()
    } else {
        format!("{}{}", req.separator, req.content)
    };
    let encoded = encode_text(&content_to_append, &req.encoding, &validated)?;

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(&validated)
        .await
        .map_err(|e| {
            OpError::new(
                ErrorCode::WriteError,
                format!("Failed to open file for append: {e}"),
            )
            .with_path(&req.path)
        })?;
    file.write_all(&encoded).await.map_err(|e| {
        OpError::new(
            ErrorCode::WriteError,
            format!("Failed to append to file: {e}"),
        )
        .with_path(&req.path)
    })?;
    file.sync_all().await.map_err(|e| {
        OpError::new(ErrorCode::WriteError, format!("Failed to sync file: {e}"))
            .with_path(&req.path)
    })?;
    drop(file);

    // The post-append hash covers the whole file; stream it back through
    // the bounded hasher rather than loading it wholesale.
    let outcome = fsbroker_core::hash_file_bounded_async(
        &validated,
        ctx.settings.crud.max_file_size_bytes,
    )
    .await
    .map_err(|e| {
        OpError::server(format!("Failed to read file for hash computation: {e}"))
            .with_path(&req.path)
    })?;
    let (new_hash, total_size) = match outcome {
        fsbroker_core::HashOutcome::Hashed { hash, size_bytes } => (hash, size_bytes),
        fsbroker_core::HashOutcome::TooLarge {
            size_bytes,
            max_bytes,
        } => {
            return Err(OpError::new(
                ErrorCode::FileTooLarge,
                format!(
                    "File {} size {size_bytes} exceeds max {max_bytes} bytes after append",
                    req.path.display()
                ),
            )
            .with_path(&req.path));
        }
        fsbroker_core::HashOutcome::NotARegularFile => {
            return Err(
                OpError::server(format!("Not a regular file: {}", req.path.display()))
                    .with_path(&req.path),
            );
        }
    };

    let event_kind = if file_existed {
        FileEventKind::Modified
    } else {
        FileEventKind::Created
    };
    ctx.record_hash(&validated, new_hash.clone(), event_kind);

    Ok(Response::Ok(AppendOk {
        path: validated,
        hash: new_hash,
        bytes_appended: encoded.len(),
        total_size_bytes: total_size,
        timestamp: fsbroker_core::utc_timestamp(),
    }))
}
