//! fsbroker-io — concurrency-safe filesystem service for cooperating
//! agents.
//!
//! The service exposes CRUD-style operations (read, write, update, append,
//! delete, rename, list, status) over individual files, built to prevent
//! lost updates when several agents touch the same paths:
//!
//! - Per-path reader/writer locks with strict FIFO ordering, batch read
//!   promotion, write timeouts, and deadlock-free dual-file acquisition
//!   for renames.
//! - Atomic, durable writes (temp file + fsync + rename + parent-dir
//!   fsync) with a cross-filesystem rename fallback.
//! - A content-addressed hash registry (`sha256:<hex>`) driving optimistic
//!   concurrency: update/delete/rename refuse to touch a file whose
//!   current hash no longer matches the caller's expectation, returning a
//!   structured contention diff instead.
//! - Path confinement to a whitelist of base directories, checked after
//!   full symlink resolution, plus prefix-based access rules for mutating
//!   operations.
//! - A filesystem watcher that folds external modifications back into the
//!   registry with debouncing and event coalescing.
//! - Optional debounced persistence of the registry and lock queues, with
//!   TTL purge and hash re-validation on startup.
//!
//! # Getting started
//!
//! ```rust,ignore
//! use fsbroker_io::ServiceHandle;
//! use fsbroker_core::{ReadRequest, WriteRequest, Response};
//!
//! # tokio_test::block_on(async {
//! let handle = ServiceHandle::builder()
//!     .with_base_directories(["/var/data"])
//!     .build();
//!
//! let written = handle
//!     .write(WriteRequest {
//!         path: "/var/data/notes.txt".into(),
//!         content: "hello".into(),
//!         encoding: "utf-8".into(),
//!         create_dirs: true,
//!         timeout: None,
//!     })
//!     .await
//!     .unwrap();
//! assert!(written.is_ok());
//!
//! handle.shutdown().await;
//! # });
//! ```
//!
//! The actor runs on its own current-thread runtime, so operations
//! progress concurrently but never in parallel; component state is
//! mutated without shared-memory races. Lock acquisitions return RAII
//! guards, so errors, panics, and cancellation can never leave a lock
//! held.

mod access;
mod actor;
pub mod atomic;
mod append;
mod batch;
mod builder;
mod delete;
pub mod diff;
pub mod errors;
mod handle;
mod list;
pub mod locks;
pub mod path_policy;
mod persist;
mod read;
mod registry;
mod rename;
mod status;
mod text;
mod update;
pub mod watcher;
mod write;

pub use access::{AccessDenied, AccessPolicy, MutatingOp};
pub use actor::Service;
pub use atomic::{atomic_write, safe_rename};
pub use builder::ServiceBuilder;
pub use diff::{
    apply_patches, check_patches, check_unified_patches, compute_diff, PatchCheck,
    UnifiedPatchOutcome,
};
pub use errors::{IoError, RecvError};
pub use handle::ServiceHandle;
pub use locks::{
    DualWriteGuard, LockError, LockGuard, LockKind, LockManager, LockManagerSnapshot, LockStatus,
};
pub use path_policy::{PathValidationError, PathValidator};
pub use persist::{PersistedState, StatePersistence};
pub use registry::HashRegistry;
pub use watcher::{start_watcher, FileChangeEvent, FileEventKind, FileWatcher};

#[cfg(test)]
mod ops_tests;
