use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use fsbroker_error::{ErrorCode, OpError};
use thiserror::Error;

/// Channel-level failures between a [`crate::ServiceHandle`] and the actor.
#[derive(Debug, Error, Clone)]
pub enum RecvError {
    #[error("Failed to send request to the fsbroker service")]
    SendError,
    #[error("Failed to receive response from the fsbroker service")]
    RecvError,
}

/// Internal I/O-layer error. Operations convert these into [`OpError`]s at
/// their boundary; the `Arc<io::Error>` keeps variants cloneable.
#[derive(Debug, Error, Clone)]
pub enum IoError {
    #[error("File operation {operation} failed for {path}: {source} (kind: {kind:?})")]
    FileOperation {
        operation: &'static str,
        path: PathBuf,
        kind: io::ErrorKind,
        source: Arc<io::Error>,
    },

    #[error("File {path} size {size_bytes} exceeds max {max_bytes} bytes")]
    TooLarge {
        path: PathBuf,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("Not a regular file: {path}")]
    NotARegularFile { path: PathBuf },

    #[error("Service channel error")]
    Recv(#[from] RecvError),
}

impl IoError {
    pub(crate) fn file_op(operation: &'static str, path: &std::path::Path, err: io::Error) -> Self {
        IoError::FileOperation {
            operation,
            path: path.to_path_buf(),
            kind: err.kind(),
            source: Arc::new(err),
        }
    }
}

impl From<IoError> for OpError {
    fn from(e: IoError) -> OpError {
        match e {
            IoError::FileOperation {
                operation,
                path,
                kind,
                source,
            } => {
                let code = if kind == io::ErrorKind::NotFound {
                    ErrorCode::FileNotFound
                } else {
                    match operation {
                        "write" | "sync" | "create" | "mkdirs" | "append" => ErrorCode::WriteError,
                        "rename" | "copy" => ErrorCode::RenameError,
                        "delete" => ErrorCode::DeleteError,
                        _ => ErrorCode::ServerError,
                    }
                };
                OpError::new(
                    code,
                    format!("Failed to {operation} {}: {source}", path.display()),
                )
                .with_path(path)
            }
            IoError::TooLarge {
                path,
                size_bytes,
                max_bytes,
            } => OpError::new(
                ErrorCode::FileTooLarge,
                format!(
                    "File {} size {size_bytes} exceeds max {max_bytes} bytes",
                    path.display()
                ),
            )
            .with_path(path),
            IoError::NotARegularFile { path } => OpError::new(
                ErrorCode::ServerError,
                format!("Not a regular file: {}", path.display()),
            )
            .with_path(path),
            IoError::Recv(recv) => OpError::server(recv.to_string()),
        }
    }
}
