//! Typed response envelopes.
//!
//! Every operation resolves to a discriminated union on `status`:
//! `ok` (operation-specific body), `contention` (hash mismatch with a
//! reconciliation diff), or `error` (stable error-code token). Batch
//! operations wrap per-item unions in an always-`ok` outer envelope with a
//! summary.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ContentHash;

/// The three-way outcome of a single operation, tagged by `status` on the
/// wire. `T` is the operation's success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response<T> {
    Ok(T),
    Contention(ContentionInfo),
    Error(ErrorInfo),
}

impl<T> Response<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, Response::Contention(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

/// Error payload. `error_code` is one of the stable string tokens defined
/// by the error crate; it is carried as a plain string here so this crate
/// stays a leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffChangeKind {
    Added,
    Removed,
    Modified,
}

/// A single structured change region in a JSON diff. Line numbers are
/// 1-based; `end_line` is present only for multi-line regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffChange {
    #[serde(rename = "type")]
    pub kind: DiffChangeKind,
    pub start_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub lines_added: usize,
    pub lines_removed: usize,
    pub lines_modified: usize,
    pub regions_changed: usize,
}

/// A diff in one of the two supported output formats, tagged by `format`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum Diff {
    Json {
        changes: Vec<DiffChange>,
        summary: DiffSummary,
    },
    Unified {
        content: String,
        summary: DiffSummary,
    },
}

impl Diff {
    pub fn summary(&self) -> &DiffSummary {
        match self {
            Diff::Json { summary, .. } => summary,
            Diff::Unified { summary, .. } => summary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConflict {
    pub patch_index: usize,
    pub reason: String,
}

/// Contention payload: the operation was refused because the file's
/// current hash no longer matches the caller's expectation. Carries
/// everything an agent needs to re-read, accept, or reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentionInfo {
    pub path: PathBuf,
    pub expected_hash: ContentHash,
    pub current_hash: ContentHash,
    pub message: String,
    pub diff: Diff,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches_applicable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<PatchConflict>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_conflicting_patches: Option<Vec<usize>>,
    pub timestamp: String,
}

// Success bodies, one per operation.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadOk {
    pub path: PathBuf,
    pub content: String,
    pub encoding: String,
    /// Hash of the full file bytes, not of the returned slice.
    pub hash: ContentHash,
    pub total_lines: usize,
    pub offset: usize,
    pub limit: Option<usize>,
    pub lines_returned: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOk {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub bytes_written: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOk {
    pub path: PathBuf,
    pub previous_hash: ContentHash,
    pub hash: ContentHash,
    pub bytes_written: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOk {
    pub path: PathBuf,
    pub deleted_hash: ContentHash,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameOk {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub hash: ContentHash,
    #[serde(default)]
    pub cross_filesystem: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendOk {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub bytes_appended: usize,
    pub total_size_bytes: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirEntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DirEntryKind,
    pub size_bytes: Option<u64>,
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOk {
    pub path: PathBuf,
    pub entries: Vec<DirEntryInfo>,
    pub total_entries: usize,
    pub pattern: String,
    pub recursive: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStateKind {
    Unlocked,
    ReadLocked,
    WriteLocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequestInfo {
    pub kind: String,
    pub queued_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_expires_at: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLockCounts {
    pub read: usize,
    pub write: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub uptime_seconds: f64,
    pub transport: String,
    pub persistence: String,
}

/// STATUS with no path: service-wide view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatusOk {
    pub server: ServerInfo,
    pub tracked_files: usize,
    pub active_locks: ActiveLockCounts,
    pub base_directories: Vec<PathBuf>,
    pub timestamp: String,
}

/// STATUS with a path: one file's registry and lock view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatusOk {
    pub path: PathBuf,
    pub exists: bool,
    pub hash: Option<ContentHash>,
    pub lock_state: LockStateKind,
    pub active_readers: usize,
    pub queue_depth: usize,
    pub pending_requests: Vec<PendingRequestInfo>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusOk {
    Server(ServerStatusOk),
    File(FileStatusOk),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default)]
    pub contention: usize,
}

/// Outer envelope for batch operations. Always `ok`; failures live in the
/// per-item results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOk<T> {
    pub results: Vec<Response<T>>,
    pub summary: BatchSummary,
    pub timestamp: String,
}

impl<T> BatchOk<T> {
    /// Builds the envelope, deriving summary counts from the items.
    pub fn from_results(results: Vec<Response<T>>) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for item in &results {
            match item {
                Response::Ok(_) => summary.succeeded += 1,
                Response::Contention(_) => summary.contention += 1,
                Response::Error(_) => summary.failed += 1,
            }
        }
        Self {
            results,
            summary,
            timestamp: crate::utc_timestamp(),
        }
    }
}
