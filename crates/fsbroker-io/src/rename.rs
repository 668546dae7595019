use fsbroker_core::{hash_bytes, ContentionInfo, RenameOk, RenameRequest, Response};
use fsbroker_error::{ErrorCode, OpError};

use crate::access::MutatingOp;
use crate::actor::ServiceCtx;
use crate::atomic::safe_rename;
use crate::diff::compute_diff;
use crate::update::contention_message;
use crate::watcher::FileEventKind;

/// RENAME: dual write locks in lexicographic order (deadlock-free),
/// optional `expected_hash` contention check on the source, and a
/// cross-filesystem copy fallback.
pub(crate) async fn run(ctx: &ServiceCtx, req: RenameRequest) -> Response<RenameOk> {
    match rename_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

async fn rename_inner(ctx: &ServiceCtx, req: &RenameRequest) -> Result<Response<RenameOk>, OpError> {
    // The source loses a file (delete check), the destination gains one
    // (write check).
    let validated_old = ctx.validate_mutating(&req.old_path, MutatingOp::Delete)?;
    let validated_new = ctx.validate_mutating(&req.new_path, MutatingOp::Write)?;

    if !validated_old.exists() {
        return Err(OpError::new(
            ErrorCode::FileNotFound,
            format!("Source file not found: {}", req.old_path.display()),
        )
        .with_path(&req.old_path));
    }

    if !req.overwrite && validated_new.exists() {
        return Err(OpError::new(
            ErrorCode::FileExists,
            format!("Destination file already exists: {}", req.new_path.display()),
        )
        .with_path(&req.new_path));
    }

    let timeout = ctx.effective_timeout(req.timeout);
    let _guards = ctx
        .locks
        .acquire_dual_write(&validated_old, &validated_new, timeout)
        .await
        .map_err(|e| crate::actor::lock_error(e, &validated_old))?;

    if let Some(expected) = &req.expected_hash {
        let current_bytes = tokio::fs::read(&validated_old).await.map_err(|e| {
            OpError::server(format!("Failed to read file for hash verification: {e}"))
                .with_path(&req.old_path)
        })?;
        let current_hash = hash_bytes(&current_bytes);

        if current_hash != *expected {
            let current_content = String::from_utf8_lossy(&current_bytes);
            let diff = compute_diff(
                "",
                &current_content,
                req.diff_format,
                ctx.settings.crud.diff_context_lines,
            );
            return Ok(Response::Contention(ContentionInfo {
                path: validated_old,
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

    if req.create_dirs {
        if let Some(parent) = validated_new.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OpError::new(
                    ErrorCode::RenameError,
                    format!("Failed to create parent directories: {e}"),
                )
                .with_path(&req.new_path)
            })?;
        }
    }

    let cross_filesystem = safe_rename(&validated_old, &validated_new).await?;

    let renamed_bytes = tokio::fs::read(&validated_new).await.map_err(|e| {
        OpError::server(format!("Failed to read renamed file: {e}")).with_path(&req.new_path)
    })?;
    let file_hash = hash_bytes(&renamed_bytes);

    ctx.registry.remove(&validated_old);
    ctx.registry.update(&validated_new, file_hash.clone());
    ctx.persistence.mark_dirty();
    ctx.publish(&validated_old, FileEventKind::Removed);
    ctx.publish(&validated_new, FileEventKind::Created);

    Ok(Response::Ok(RenameOk {
        old_path: validated_old,
        new_path: validated_new,
        hash: file_hash,
        cross_filesystem,
        timestamp: fsbroker_core::utc_timestamp(),
    }))
}
