//! fsbroker-error — the stable error taxonomy for fsbroker operations.
//!
//! Errors here are values, never panics: every operation resolves to a
//! typed response, and failures travel as [`OpError`] until the operation
//! boundary converts them into a `status: "error"` envelope. The
//! [`ErrorCode`] tokens are part of the wire contract and must never be
//! renamed.

use std::path::PathBuf;

use fsbroker_core::ErrorInfo;
use serde::{Deserialize, Serialize};

/// Workspace-wide result alias for fallible operation steps.
pub type Result<T, E = OpError> = std::result::Result<T, E>;

/// Stable error-code tokens. Serialized exactly as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "FILE_NOT_FOUND")]
    FileNotFound,
    #[serde(rename = "FILE_EXISTS")]
    FileExists,
    #[serde(rename = "ACCESS_DENIED")]
    AccessDenied,
    #[serde(rename = "PATH_OUTSIDE_BASE")]
    PathOutsideBase,
    #[serde(rename = "LOCK_TIMEOUT")]
    LockTimeout,
    #[serde(rename = "ENCODING_ERROR")]
    EncodingError,
    #[serde(rename = "INVALID_PATCH")]
    InvalidPatch,
    #[serde(rename = "CONTENT_OR_PATCHES_REQUIRED")]
    ContentOrPatchesRequired,
    #[serde(rename = "FILE_TOO_LARGE")]
    FileTooLarge,
    #[serde(rename = "WRITE_ERROR")]
    WriteError,
    #[serde(rename = "DELETE_ERROR")]
    DeleteError,
    #[serde(rename = "RENAME_ERROR")]
    RenameError,
    #[serde(rename = "DIR_NOT_FOUND")]
    DirNotFound,
    #[serde(rename = "SERVER_ERROR")]
    ServerError,
}

impl ErrorCode {
    /// The wire token for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::FileExists => "FILE_EXISTS",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::PathOutsideBase => "PATH_OUTSIDE_BASE",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::EncodingError => "ENCODING_ERROR",
            ErrorCode::InvalidPatch => "INVALID_PATCH",
            ErrorCode::ContentOrPatchesRequired => "CONTENT_OR_PATCHES_REQUIRED",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::WriteError => "WRITE_ERROR",
            ErrorCode::DeleteError => "DELETE_ERROR",
            ErrorCode::RenameError => "RENAME_ERROR",
            ErrorCode::DirNotFound => "DIR_NOT_FOUND",
            ErrorCode::ServerError => "SERVER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation-level failure: a stable code, a human-readable message,
/// and optionally the path and structured details.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct OpError {
    pub code: ErrorCode,
    pub message: String,
    pub path: Option<PathBuf>,
    pub details: Option<serde_json::Value>,
}

impl OpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            details: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Wraps an unexpected failure as the catch-all `SERVER_ERROR`.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, message)
    }
}

impl From<OpError> for ErrorInfo {
    fn from(err: OpError) -> Self {
        ErrorInfo {
            error_code: err.code.as_str().to_string(),
            message: err.message,
            path: err.path,
            details: err.details,
        }
    }
}
