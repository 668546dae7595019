use fsbroker_core::{hash_bytes, ReadOk, ReadRequest, Response};
use fsbroker_error::{ErrorCode, OpError};

use crate::actor::ServiceCtx;
use crate::text::{decode_text, split_lines_keep_ends};

/// READ: shared lock, full-file hash, line-sliced content.
///
/// The returned hash always covers the FULL file bytes, not the slice, so
/// agents can use it as `expected_hash` in a later update.
pub(crate) async fn run(ctx: &ServiceCtx, req: ReadRequest) -> Response<ReadOk> {
    match read_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

async fn read_inner(ctx: &ServiceCtx, req: &ReadRequest) -> Result<Response<ReadOk>, OpError> {
    let validated = ctx.validate(&req.path)?;

    if !validated.exists() {
        return Err(OpError::new(
            ErrorCode::FileNotFound,
            format!("File not found: {}", req.path.display()),
        )
        .with_path(&req.path));
    }

    let _guard = ctx.acquire_read(&validated).await?;

    let meta = tokio::fs::metadata(&validated)
        .await
        .map_err(|e| file_missing_or_server(req, e))?;
    let max_bytes = ctx.settings.crud.max_file_size_bytes;
    if meta.len() > max_bytes {
        return Err(OpError::new(
            ErrorCode::FileTooLarge,
            format!(
                "File {} size {} exceeds max {max_bytes} bytes",
                req.path.display(),
                meta.len()
            ),
        )
        .with_path(&req.path));
    }

    let raw_bytes = tokio::fs::read(&validated)
        .await
        .map_err(|e| file_missing_or_server(req, e))?;
    let file_hash = hash_bytes(&raw_bytes);

    let content = decode_text(&raw_bytes, &req.encoding, &validated)?;

    let lines = split_lines_keep_ends(&content);
    let total_lines = lines.len();
    let sliced: &[&str] = match req.limit {
        Some(limit) => {
            let start = req.offset.min(lines.len());
            let end = start.saturating_add(limit).min(lines.len());
            &lines[start..end]
        }
        None => &lines[req.offset.min(lines.len())..],
    };
    let lines_returned = sliced.len();
    let content = sliced.concat();

    // First successful read of a path registers it for tracking; mutating
    // operations own subsequent hash updates. No change event: reading
    // changes nothing.
    if ctx.registry.get(&validated).is_none() {
        ctx.registry.update(&validated, file_hash.clone());
        ctx.persistence.mark_dirty();
    }

    Ok(Response::Ok(ReadOk {
        path: validated,
        content,
        encoding: req.encoding.clone(),
        hash: file_hash,
        total_lines,
        offset: req.offset,
        limit: req.limit,
        lines_returned,
        timestamp: fsbroker_core::utc_timestamp(),
    }))
}

fn file_missing_or_server(req: &ReadRequest, e: std::io::Error) -> OpError {
    if e.kind() == std::io::ErrorKind::NotFound {
        OpError::new(
            ErrorCode::FileNotFound,
            format!("File not found: {}", req.path.display()),
        )
        .with_path(&req.path)
    } else {
        OpError::server(format!("Failed to read {}: {e}", req.path.display())).with_path(&req.path)
    }
}
