use fsbroker_core::{hash_bytes, ContentionInfo, DeleteOk, DeleteRequest, Response};
use fsbroker_error::{ErrorCode, OpError};

use crate::access::MutatingOp;
use crate::actor::ServiceCtx;
use crate::diff::compute_diff;
use crate::update::contention_message;
use crate::watcher::FileEventKind;

/// DELETE: unlink under an exclusive lock, optionally guarded by
/// `expected_hash`. On mismatch the file is preserved and the caller gets
/// a contention payload diffing nothing against the current content.
pub(crate) async fn run(ctx: &ServiceCtx, req: DeleteRequest) -> Response<DeleteOk> {
    match delete_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

async fn delete_inner(ctx: &ServiceCtx, req: &DeleteRequest) -> Result<Response<DeleteOk>, OpError> {
    let validated = ctx.validate_mutating(&req.path, MutatingOp::Delete)?;

    if !validated.exists() {
        return Err(OpError::new(
            ErrorCode::FileNotFound,
            format!("File not found: {}", req.path.display()),
        )
        .with_path(&req.path));
    }

    let timeout = ctx.effective_timeout(req.timeout);
    let _guard = ctx.acquire_write(&validated, timeout).await?;

    let current_bytes = tokio::fs::read(&validated).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            OpError::new(
                ErrorCode::FileNotFound,
                format!("File not found: {}", req.path.display()),
            )
            .with_path(&req.path)
        } else {
            OpError::server(format!("Failed to read file for hash check: {e}"))
                .with_path(&req.path)
        }
    })?;
    let current_hash = hash_bytes(&current_bytes);

    if let Some(expected) = &req.expected_hash {
        if current_hash != *expected {
            // There is no expected body to show for a delete; the diff
            // presents the current content in full.
            let current_content = String::from_utf8_lossy(&current_bytes);
            let diff = compute_diff(
                "",
                &current_content,
                req.diff_format,
                ctx.settings.crud.diff_context_lines,
            );
            return Ok(Response::Contention(ContentionInfo {
                path: validated,
                expected_hash: expected.clone(),
                current_hash,
                message: contention_message(expected),
                diff,
                patches_applicable: None,
                conflicts: None,
                non_conflicting_patches: None,
                timestamp: fsbroker_core::utc_timestamp(),
            }));
        }
    }

    tokio::fs::remove_file(&validated).await.map_err(|e| {
        OpError::new(
            ErrorCode::DeleteError,
            format!("Failed to delete file: {e}"),
        )
        .with_path(&req.path)
    })?;

    ctx.registry.remove(&validated);
    ctx.persistence.mark_dirty();
    ctx.publish(&validated, FileEventKind::Removed);

    Ok(Response::Ok(DeleteOk {
        path: validated,
        deleted_hash: current_hash,
        timestamp: fsbroker_core::utc_timestamp(),
    }))
}
