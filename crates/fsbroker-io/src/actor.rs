use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fsbroker_core::{
    AppendOk, AppendRequest, BatchOk, BatchReadRequest, BatchUpdateRequest, BatchWriteRequest,
    DeleteOk, DeleteRequest, ListOk, ListRequest, ReadOk, ReadRequest, RenameOk, RenameRequest,
    Response, Settings, StatusOk, StatusRequest, UpdateOk, UpdateRequest, WriteOk, WriteRequest,
};
use fsbroker_error::{ErrorCode, OpError};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::access::{AccessPolicy, MutatingOp};
use crate::locks::{LockError, LockGuard, LockManager};
use crate::path_policy::PathValidator;
use crate::persist::StatePersistence;
use crate::registry::HashRegistry;
use crate::watcher::{FileChangeEvent, FileEventKind};

/// Shared state every operation composes over.
pub(crate) struct ServiceCtx {
    pub settings: Settings,
    pub validator: PathValidator,
    pub policy: AccessPolicy,
    pub locks: LockManager,
    pub registry: Arc<HashRegistry>,
    pub persistence: StatePersistence,
    pub events_tx: broadcast::Sender<FileChangeEvent>,
    pub started_at: Instant,
    pub transport: String,
}

impl ServiceCtx {
    /// Path confinement for read-side operations.
    pub(crate) fn validate(&self, path: &Path) -> Result<PathBuf, OpError> {
        self.validator.validate(path).map_err(|e| {
            OpError::new(ErrorCode::PathOutsideBase, e.to_string()).with_path(path)
        })
    }

    /// Path confinement plus the access policy gate for mutating
    /// operations.
    pub(crate) fn validate_mutating(
        &self,
        path: &Path,
        op: MutatingOp,
    ) -> Result<PathBuf, OpError> {
        let validated = self.validate(path)?;
        self.policy.check(&validated, op).map_err(|e| {
            OpError::new(ErrorCode::AccessDenied, e.to_string()).with_path(path)
        })?;
        Ok(validated)
    }

    pub(crate) fn effective_timeout(&self, requested: Option<f64>) -> f64 {
        self.settings.effective_timeout(requested)
    }

    pub(crate) async fn acquire_write(
        &self,
        path: &Path,
        timeout: f64,
    ) -> Result<LockGuard, OpError> {
        self.locks
            .acquire_write(path, timeout)
            .await
            .map_err(|e| lock_error(e, path))
    }

    pub(crate) async fn acquire_read(&self, path: &Path) -> Result<LockGuard, OpError> {
        self.locks
            .acquire_read(path)
            .await
            .map_err(|e| lock_error(e, path))
    }

    /// Records a hash, schedules a persistence save, and publishes the
    /// change to subscribers.
    pub(crate) fn record_hash(
        &self,
        path: &Path,
        hash: fsbroker_core::ContentHash,
        kind: FileEventKind,
    ) {
        self.registry.update(path, hash);
        self.persistence.mark_dirty();
        self.publish(path, kind);
    }

    pub(crate) fn publish(&self, path: &Path, kind: FileEventKind) {
        let _ = self.events_tx.send(FileChangeEvent {
            path: path.to_path_buf(),
            kind,
        });
    }
}

pub(crate) fn lock_error(err: LockError, path: &Path) -> OpError {
    match err {
        LockError::Timeout { seconds } => OpError::new(
            ErrorCode::LockTimeout,
            format!("Failed to acquire write lock within {seconds}s"),
        )
        .with_path(path),
        LockError::Interrupted => OpError::server(format!(
            "Lock request for {} was discarded before it could be granted",
            path.display()
        )),
    }
}

/// A message the service actor consumes.
pub(crate) enum ServiceMessage {
    Request(OpRequest),
    Shutdown,
}

/// Operation requests, each carrying its oneshot responder.
pub(crate) enum OpRequest {
    Read {
        req: ReadRequest,
        responder: oneshot::Sender<Response<ReadOk>>,
    },
    Write {
        req: WriteRequest,
        responder: oneshot::Sender<Response<WriteOk>>,
    },
    Update {
        req: UpdateRequest,
        responder: oneshot::Sender<Response<UpdateOk>>,
    },
    Delete {
        req: DeleteRequest,
        responder: oneshot::Sender<Response<DeleteOk>>,
    },
    Rename {
        req: RenameRequest,
        responder: oneshot::Sender<Response<RenameOk>>,
    },
    Append {
        req: AppendRequest,
        responder: oneshot::Sender<Response<AppendOk>>,
    },
    List {
        req: ListRequest,
        responder: oneshot::Sender<Response<ListOk>>,
    },
    Status {
        req: StatusRequest,
        responder: oneshot::Sender<Response<StatusOk>>,
    },
    BatchRead {
        req: BatchReadRequest,
        responder: oneshot::Sender<Response<BatchOk<ReadOk>>>,
    },
    BatchWrite {
        req: BatchWriteRequest,
        responder: oneshot::Sender<Response<BatchOk<WriteOk>>>,
    },
    BatchUpdate {
        req: BatchUpdateRequest,
        responder: oneshot::Sender<Response<BatchOk<UpdateOk>>>,
    },
}

/// The service actor: receives requests over a channel and spawns each
/// onto its runtime so operations interleave cooperatively. Shutdown
/// flushes persistence before the loop exits.
pub struct Service {
    rx: mpsc::Receiver<ServiceMessage>,
    ctx: Arc<ServiceCtx>,
}

impl Service {
    pub(crate) fn new(rx: mpsc::Receiver<ServiceMessage>, ctx: Arc<ServiceCtx>) -> Self {
        Self { rx, ctx }
    }

    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                ServiceMessage::Request(request) => self.dispatch(request),
                ServiceMessage::Shutdown => {
                    self.ctx.persistence.save_now().await;
                    break;
                }
            }
        }
    }

    fn dispatch(&self, request: OpRequest) {
        let ctx = Arc::clone(&self.ctx);
        match request {
            OpRequest::Read { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::read::run(&ctx, req).await);
                });
            }
            OpRequest::Write { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::write::run(&ctx, req).await);
                });
            }
            OpRequest::Update { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::update::run(&ctx, req).await);
                });
            }
            OpRequest::Delete { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::delete::run(&ctx, req).await);
                });
            }
            OpRequest::Rename { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::rename::run(&ctx, req).await);
                });
            }
            OpRequest::Append { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::append::run(&ctx, req).await);
                });
            }
            OpRequest::List { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::list::run(&ctx, req).await);
                });
            }
            OpRequest::Status { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::status::run(&ctx, req).await);
                });
            }
            OpRequest::BatchRead { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::batch::batch_read(&ctx, req).await);
                });
            }
            OpRequest::BatchWrite { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::batch::batch_write(&ctx, req).await);
                });
            }
            OpRequest::BatchUpdate { req, responder } => {
                tokio::spawn(async move {
                    let _ = responder.send(crate::batch::batch_update(&ctx, req).await);
                });
            }
        }
    }
}
