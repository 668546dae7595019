use fsbroker_core::{hash_bytes, Response, WriteOk, WriteRequest};
use fsbroker_error::{ErrorCode, OpError};

use crate::access::MutatingOp;
use crate::actor::ServiceCtx;
use crate::atomic::atomic_write;
use crate::text::encode_text;
use crate::watcher::FileEventKind;

/// WRITE: create-only atomic write under an exclusive lock.
///
/// Existence is checked both before and after lock acquisition; the
/// re-check under the lock closes the create/create race.
pub(crate) async fn run(ctx: &ServiceCtx, req: WriteRequest) -> Response<WriteOk> {
    match write_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

fn already_exists(req: &WriteRequest) -> OpError {
    OpError::new(
        ErrorCode::FileExists,
        format!("File already exists: {}", req.path.display()),
    )
    .with_path(&req.path)
}

async fn write_inner(ctx: &ServiceCtx, req: &WriteRequest) -> Result<Response<WriteOk>, OpError> {
    let validated = ctx.validate_mutating(&req.path, MutatingOp::Write)?;

    if validated.exists() {
        return Err(already_exists(req));
    }

    let timeout = ctx.effective_timeout(req.timeout);
    let _guard = ctx.acquire_write(&validated, timeout).await?;

    if validated.exists() {
        return Err(already_exists(req));
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

    let encoded = encode_text(&req.content, &req.encoding, &validated)?;
    atomic_write(&validated, &encoded).await?;

    let file_hash = hash_bytes(&encoded);
    ctx.record_hash(&validated, file_hash.clone(), FileEventKind::Created);

    Ok(Response::Ok(WriteOk {
        path: validated,
        hash: file_hash,
        bytes_written: encoded.len(),
        timestamp: fsbroker_core::utc_timestamp(),
    }))
}
