use fsbroker_core::{
    AppendOk, AppendRequest, BatchOk, BatchReadRequest, BatchUpdateRequest, BatchWriteRequest,
    DeleteOk, DeleteRequest, ListOk, ListRequest, ReadOk, ReadRequest, RenameOk, RenameRequest,
    Response, StatusOk, StatusRequest, UpdateOk, UpdateRequest, WriteOk, WriteRequest,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::actor::{OpRequest, ServiceMessage};
use crate::builder::ServiceBuilder;
use crate::errors::RecvError;
use crate::watcher::FileChangeEvent;

/**
A handle to the fsbroker service actor.

The primary public-facing API: spawns and communicates with an internal
actor running on a dedicated single-threaded Tokio runtime, so operations
interleave cooperatively without shared-memory races. Cloneable and cheap
to pass around.

Every operation resolves to a typed [`Response`]: `ok`, `contention`
(hash mismatch with a reconciliation diff), or `error` (stable code).
Channel failures surface separately as [`RecvError`].
*/
#[derive(Clone, Debug)]
pub struct ServiceHandle {
    pub(crate) tx: mpsc::Sender<ServiceMessage>,
    pub(crate) events_tx: broadcast::Sender<FileChangeEvent>,
}

macro_rules! op_method {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $req:ty, $ok:ty) => {
        $(#[$doc])*
        pub async fn $name(&self, req: $req) -> Result<Response<$ok>, RecvError> {
            let (responder, response_rx) = oneshot::channel();
            self.tx
                .send(ServiceMessage::Request(OpRequest::$variant { req, responder }))
                .await
                .map_err(|_| RecvError::SendError)?;
            response_rx.await.map_err(|_| RecvError::RecvError)
        }
    };
}

impl ServiceHandle {
    /// Create a builder to configure the service before starting it.
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    op_method!(
        /// Read a line slice of a file under a shared lock. The returned
        /// hash covers the full file, not the slice.
        read, Read, ReadRequest, ReadOk
    );
    op_method!(
        /// Create a new file atomically; fails with `FILE_EXISTS` if the
        /// target is already present.
        write, Write, WriteRequest, WriteOk
    );
    op_method!(
        /// Replace or patch a file's content, guarded by `expected_hash`.
        /// A mismatch yields `status: contention` and leaves the file
        /// untouched.
        update, Update, UpdateRequest, UpdateOk
    );
    op_method!(
        /// Delete a file, optionally guarded by `expected_hash`.
        delete, Delete, DeleteRequest, DeleteOk
    );
    op_method!(
        /// Rename a file under dual write locks, with cross-filesystem
        /// fallback.
        rename, Rename, RenameRequest, RenameOk
    );
    op_method!(
        /// Append to a file (optionally creating it), with separator
        /// handling at the old/new boundary.
        append, Append, AppendRequest, AppendOk
    );
    op_method!(
        /// List a directory with a glob filter.
        list, List, ListRequest, ListOk
    );
    op_method!(
        /// Service-wide or per-file status.
        status, Status, StatusRequest, StatusOk
    );
    op_method!(
        /// Sequential per-item reads; partial failure never aborts the
        /// batch.
        batch_read, BatchRead, BatchReadRequest, BatchOk<ReadOk>
    );
    op_method!(
        /// Sequential per-item creates.
        batch_write, BatchWrite, BatchWriteRequest, BatchOk<WriteOk>
    );
    op_method!(
        /// Sequential per-item updates; contention is counted separately
        /// in the summary.
        batch_update, BatchUpdate, BatchUpdateRequest, BatchOk<UpdateOk>
    );

    /// Subscribe to change events for tracked files, published by both
    /// operations and the watcher. Lagging subscribers drop events
    /// rather than applying backpressure.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.events_tx.subscribe()
    }

    /// Cooperative shutdown: the actor flushes persistence and exits.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ServiceMessage::Shutdown).await;
    }
}
