//! fsbroker-core — shared data types for the fsbroker workspace.
//!
//! This crate holds the leaf types that every other fsbroker crate agrees
//! on: the canonical content-hash format, the typed operation request and
//! response envelopes, the diff payload shapes, and the configuration
//! surface. It deliberately stays free of any I/O beyond the bounded file
//! hashers so that downstream crates can depend on it without dragging in
//! the service machinery.

pub mod config;
pub mod content_hash;
pub mod requests;
pub mod responses;

pub use config::{
    AccessAction, CrudConfig, PathRule, PersistenceConfig, Settings, WatcherConfig,
};
pub use content_hash::{hash_bytes, hash_file_bounded, ContentHash, HashOutcome};
#[cfg(feature = "read-tokio")]
pub use content_hash::hash_file_bounded_async;
pub use requests::{
    AppendRequest, BatchReadRequest, BatchUpdateItem, BatchUpdateRequest, BatchWriteItem,
    BatchWriteRequest, DeleteRequest, DiffFormat, ListRequest, Patch, ReadRequest, RenameRequest,
    StatusRequest, UpdatePayload, UpdateRequest, WriteRequest,
};
pub use responses::{
    ActiveLockCounts, AppendOk, BatchOk, BatchSummary, ContentionInfo, DeleteOk, Diff, DiffChange,
    DiffChangeKind, DiffSummary, DirEntryInfo, DirEntryKind, ErrorInfo, FileStatusOk, ListOk,
    LockStateKind, PatchConflict, PendingRequestInfo, ReadOk, RenameOk, Response, ServerInfo,
    ServerStatusOk, StatusOk, UpdateOk, WriteOk,
};

/// Returns the current UTC time formatted as an ISO-8601 / RFC 3339 string,
/// the timestamp format carried by every response envelope.
pub fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
