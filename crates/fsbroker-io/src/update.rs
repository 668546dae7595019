use std::path::Path;

use fsbroker_core::{
    hash_bytes, ContentHash, ContentionInfo, Response, UpdateOk, UpdatePayload, UpdateRequest,
};
use fsbroker_error::{ErrorCode, OpError};

use crate::access::MutatingOp;
use crate::actor::ServiceCtx;
use crate::atomic::atomic_write;
use crate::diff::{apply_patches, check_patches, compute_diff};
use crate::text::{decode_text, encode_text};
use crate::watcher::FileEventKind;

/// UPDATE: optimistic-concurrency mutation. The caller's `expected_hash`
/// must equal the file's current hash or the operation is refused with a
/// contention payload; the file is never touched on mismatch.
pub(crate) async fn run(ctx: &ServiceCtx, req: UpdateRequest) -> Response<UpdateOk> {
    match update_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

pub(crate) fn contention_message(expected: &ContentHash) -> String {
    let prefix: String = expected.as_str().chars().take(16).collect();
    format!("File has been modified since hash {prefix}...")
}

async fn update_inner(ctx: &ServiceCtx, req: &UpdateRequest) -> Result<Response<UpdateOk>, OpError> {
    // Decode-time validation runs upstream; re-check here so a hand-built
    // request cannot slip through with neither or both sides.
    let Some(payload) = req.payload() else {
        return Err(OpError::new(
            ErrorCode::ContentOrPatchesRequired,
            "Exactly one of content or patches must be provided",
        )
        .with_path(&req.path));
    };

    let validated = ctx.validate_mutating(&req.path, MutatingOp::Update)?;

    if !validated.exists() {
        return Err(OpError::new(
            ErrorCode::FileNotFound,
            format!("File does not exist: {}", req.path.display()),
        )
        .with_path(&req.path));
    }

    let timeout = ctx.effective_timeout(req.timeout);
    let _guard = ctx.acquire_write(&validated, timeout).await?;

    let current_bytes = tokio::fs::read(&validated).await.map_err(|e| {
        OpError::server(format!("Failed to read file for hash check: {e}")).with_path(&req.path)
    })?;
    let current_hash = hash_bytes(&current_bytes);

    if current_hash != req.expected_hash {
        let contention =
            build_contention(ctx, req, &payload, &validated, &current_bytes, current_hash)?;
        return Ok(Response::Contention(contention));
    }

    // Hash matches: apply the mutation.
    let previous_hash = current_hash;
    let new_content = match &payload {
        UpdatePayload::Content(content) => (*content).to_string(),
        UpdatePayload::Patches(patches) => {
            let current_content = decode_text(&current_bytes, &req.encoding, &validated)?;
            apply_patches(&current_content, patches).map_err(|idx| {
                let snippet: String = patches[idx].old_string.chars().take(50).collect();
                OpError::new(
                    ErrorCode::InvalidPatch,
                    format!("Patch {idx}: old_string not found in file content: {snippet}..."),
                )
                .with_path(&req.path)
            })?
        }
    };

    let encoded = encode_text(&new_content, &req.encoding, &validated)?;
    atomic_write(&validated, &encoded).await?;

    let new_hash = hash_bytes(&encoded);
    ctx.record_hash(&validated, new_hash.clone(), FileEventKind::Modified);

    Ok(Response::Ok(UpdateOk {
        path: validated,
        previous_hash,
        hash: new_hash,
        bytes_written: encoded.len(),
        timestamp: fsbroker_core::utc_timestamp(),
    }))
}

fn build_contention(
    ctx: &ServiceCtx,
    req: &UpdateRequest,
    payload: &UpdatePayload<'_>,
    validated: &Path,
    current_bytes: &[u8],
    current_hash: ContentHash,
) -> Result<ContentionInfo, OpError> {
    let current_content = decode_text(current_bytes, &req.encoding, validated)?;
    let context_lines = ctx.settings.crud.diff_context_lines;

    let (diff, patches_applicable, conflicts, non_conflicting) = match payload {
        UpdatePayload::Content(content) => {
            // Content mode: what the agent wanted to write vs what is there.
            let diff = compute_diff(content, &current_content, req.diff_format, context_lines);
            (diff, None, None, None)
        }
        UpdatePayload::Patches(patches) => {
            // Patch mode: the hypothetical post-patch text is the
            // "expected" side of the diff.
            let check = check_patches(&current_content, patches);
            let diff = compute_diff(
                &check.applied_text,
                &current_content,
                req.diff_format,
                context_lines,
            );
            (
                diff,
                Some(check.all_applicable),
                (!check.conflicts.is_empty()).then_some(check.conflicts),
                (!check.non_conflicting.is_empty()).then_some(check.non_conflicting),
            )
        }
    };

    Ok(ContentionInfo {
        path: validated.to_path_buf(),
        expected_hash: req.expected_hash.clone(),
        current_hash,
        message: contention_message(&req.expected_hash),
        diff,
        patches_applicable,
        conflicts,
        non_conflicting_patches: non_conflicting,
        timestamp: fsbroker_core::utc_timestamp(),
    })
}
