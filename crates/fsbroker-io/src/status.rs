use fsbroker_core::{
    ActiveLockCounts, FileStatusOk, Response, ServerInfo, ServerStatusOk, StatusOk, StatusRequest,
};
use fsbroker_error::OpError;

use crate::actor::ServiceCtx;

/// STATUS: service-wide view (no path) or a single file's registry and
/// lock state (with a path).
pub(crate) async fn run(ctx: &ServiceCtx, req: StatusRequest) -> Response<StatusOk> {
    match status_inner(ctx, &req).await {
        Ok(response) => response,
        Err(err) => Response::Error(err.into()),
    }
}

async fn status_inner(ctx: &ServiceCtx, req: &StatusRequest) -> Result<Response<StatusOk>, OpError> {
    let Some(path) = &req.path else {
        let (read, write) = ctx.locks.aggregate_counts();
        let persistence = if ctx.persistence.enabled() {
            "enabled"
        } else {
            "disabled"
        };
        return Ok(Response::Ok(StatusOk::Server(ServerStatusOk {
            server: ServerInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_seconds: ctx.started_at.elapsed().as_secs_f64(),
                transport: ctx.transport.clone(),
                persistence: persistence.to_string(),
            },
            tracked_files: ctx.registry.len(),
            active_locks: ActiveLockCounts { read, write },
            base_directories: ctx.validator.base_directories().to_vec(),
            timestamp: fsbroker_core::utc_timestamp(),
        })));
    };

    let validated = ctx.validate(path)?;
    let lock_status = ctx.locks.status(&validated);

    Ok(Response::Ok(StatusOk::File(FileStatusOk {
        exists: validated.exists(),
        hash: ctx.registry.get(&validated),
        lock_state: lock_status.state_kind(),
        active_readers: lock_status.active_readers,
        queue_depth: lock_status.queued,
        pending_requests: ctx.locks.pending_for(&validated),
        path: validated,
        timestamp: fsbroker_core::utc_timestamp(),
    })))
}
