//! End-to-end operation tests driven through the public handle.

use std::path::{Path, PathBuf};

use fsbroker_core::{
    hash_bytes, AccessAction, AppendRequest, BatchUpdateItem, BatchUpdateRequest, BatchWriteItem,
    BatchWriteRequest, ContentHash, ContentionInfo, DeleteRequest, DiffFormat, ErrorInfo,
    ListRequest, Patch, PathRule, ReadRequest, RenameRequest, Response, Settings, StatusOk,
    StatusRequest, UpdateRequest, WriteRequest,
};
use tempfile::{tempdir, TempDir};

use crate::handle::ServiceHandle;

/// Opt-in logging for debugging test failures: RUST_LOG=debug cargo test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.crud.base_directories = vec![dir.to_path_buf()];
    // The watcher gets its own tests; keep operation tests deterministic.
    settings.watcher.enabled = false;
    settings
}

fn handle_for(dir: &TempDir) -> ServiceHandle {
    ServiceHandle::builder()
        .with_settings(test_settings(dir.path()))
        .build()
}

fn unwrap_ok<T>(resp: Response<T>) -> T {
    match resp {
        Response::Ok(body) => body,
        Response::Contention(c) => panic!("expected ok, got contention: {}", c.message),
        Response::Error(e) => panic!("expected ok, got error {}: {}", e.error_code, e.message),
    }
}

fn unwrap_error<T>(resp: Response<T>) -> ErrorInfo {
    match resp {
        Response::Error(e) => e,
        Response::Ok(_) => panic!("expected error, got ok"),
        Response::Contention(c) => panic!("expected error, got contention: {}", c.message),
    }
}

fn unwrap_contention<T>(resp: Response<T>) -> ContentionInfo {
    match resp {
        Response::Contention(c) => c,
        Response::Ok(_) => panic!("expected contention, got ok"),
        Response::Error(e) => {
            panic!("expected contention, got error {}: {}", e.error_code, e.message)
        }
    }
}

fn read_req(path: &Path) -> ReadRequest {
    ReadRequest {
        path: path.to_path_buf(),
        offset: 0,
        limit: None,
        encoding: "utf-8".to_string(),
    }
}

fn write_req(path: &Path, content: &str) -> WriteRequest {
    WriteRequest {
        path: path.to_path_buf(),
        content: content.to_string(),
        encoding: "utf-8".to_string(),
        create_dirs: true,
        timeout: None,
    }
}

fn update_content_req(path: &Path, expected: ContentHash, content: &str) -> UpdateRequest {
    UpdateRequest {
        path: path.to_path_buf(),
        expected_hash: expected,
        content: Some(content.to_string()),
        patches: None,
        encoding: "utf-8".to_string(),
        timeout: None,
        diff_format: DiffFormat::Json,
    }
}

fn update_patches_req(path: &Path, expected: ContentHash, patches: Vec<(&str, &str)>) -> UpdateRequest {
    UpdateRequest {
        path: path.to_path_buf(),
        expected_hash: expected,
        content: None,
        patches: Some(
            patches
                .into_iter()
                .map(|(old, new)| Patch {
                    old_string: old.to_string(),
                    new_string: new.to_string(),
                })
                .collect(),
        ),
        encoding: "utf-8".to_string(),
        timeout: None,
        diff_format: DiffFormat::Json,
    }
}

fn delete_req(path: &Path, expected: Option<ContentHash>) -> DeleteRequest {
    DeleteRequest {
        path: path.to_path_buf(),
        expected_hash: expected,
        timeout: None,
        diff_format: DiffFormat::Json,
    }
}

fn rename_req(old: &Path, new: &Path, overwrite: bool) -> RenameRequest {
    RenameRequest {
        old_path: old.to_path_buf(),
        new_path: new.to_path_buf(),
        expected_hash: None,
        overwrite,
        create_dirs: true,
        timeout: None,
        diff_format: DiffFormat::Json,
    }
}

fn append_req(path: &Path, content: &str, separator: &str, create_if_missing: bool) -> AppendRequest {
    AppendRequest {
        path: path.to_path_buf(),
        content: content.to_string(),
        encoding: "utf-8".to_string(),
        create_if_missing,
        create_dirs: true,
        separator: separator.to_string(),
        timeout: None,
    }
}

#[tokio::test]
async fn read_applies_offset_and_limit_with_full_file_hash() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("lines.txt");
    let body = "line 1\nline 2\nline 3\nline 4\nline 5\n";
    std::fs::write(&file, body).unwrap();

    let mut req = read_req(&file);
    req.offset = 1;
    req.limit = Some(2);
    let ok = unwrap_ok(handle.read(req).await.unwrap());

    assert_eq!(ok.content, "line 2\nline 3\n");
    assert_eq!(ok.total_lines, 5);
    assert_eq!(ok.offset, 1);
    assert_eq!(ok.limit, Some(2));
    assert_eq!(ok.lines_returned, 2);
    // The hash covers the FULL file bytes, not the slice.
    assert_eq!(ok.hash, hash_bytes(body.as_bytes()));

    handle.shutdown().await;
}

#[tokio::test]
async fn read_without_limit_returns_everything_from_offset() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("lines.txt");
    std::fs::write(&file, "a\nb\nc\n").unwrap();

    let mut req = read_req(&file);
    req.offset = 1;
    let ok = unwrap_ok(handle.read(req).await.unwrap());
    assert_eq!(ok.content, "b\nc\n");
    assert_eq!(ok.lines_returned, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn read_missing_file_is_file_not_found() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);

    let err = unwrap_error(
        handle
            .read(read_req(&dir.path().join("ghost.txt")))
            .await
            .unwrap(),
    );
    assert_eq!(err.error_code, "FILE_NOT_FOUND");

    handle.shutdown().await;
}

#[tokio::test]
async fn operations_outside_base_are_refused() {
    let dir = tempdir().unwrap();
    let elsewhere = tempdir().unwrap();
    let handle = handle_for(&dir);

    let err = unwrap_error(
        handle
            .read(read_req(&elsewhere.path().join("x.txt")))
            .await
            .unwrap(),
    );
    assert_eq!(err.error_code, "PATH_OUTSIDE_BASE");

    let target = elsewhere.path().join("y.txt");
    let err = unwrap_error(handle.write(write_req(&target, "data")).await.unwrap());
    assert_eq!(err.error_code, "PATH_OUTSIDE_BASE");
    assert!(!target.exists());

    handle.shutdown().await;
}

#[tokio::test]
async fn write_creates_a_file_and_registers_its_hash() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("new.txt");

    let ok = unwrap_ok(handle.write(write_req(&file, "hello")).await.unwrap());
    assert_eq!(ok.bytes_written, 5);
    assert_eq!(ok.hash, hash_bytes(b"hello"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello");

    let status = unwrap_ok(
        handle
            .status(StatusRequest {
                path: Some(file.clone()),
            })
            .await
            .unwrap(),
    );
    let StatusOk::File(file_status) = status else {
        panic!("expected file status");
    };
    assert!(file_status.exists);
    assert_eq!(file_status.hash, Some(hash_bytes(b"hello")));

    handle.shutdown().await;
}

#[tokio::test]
async fn write_is_create_only() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("taken.txt");
    std::fs::write(&file, "already here").unwrap();

    let err = unwrap_error(handle.write(write_req(&file, "clobber")).await.unwrap());
    assert_eq!(err.error_code, "FILE_EXISTS");
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "already here");

    handle.shutdown().await;
}

#[tokio::test]
async fn write_creates_missing_parent_directories() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("a").join("b").join("deep.txt");

    unwrap_ok(handle.write(write_req(&file, "deep")).await.unwrap());
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "deep");

    handle.shutdown().await;
}

#[tokio::test]
async fn update_with_matching_hash_replaces_content() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");
    std::fs::write(&file, "Original").unwrap();
    let h0 = hash_bytes(b"Original");

    let ok = unwrap_ok(
        handle
            .update(update_content_req(&file, h0.clone(), "Updated"))
            .await
            .unwrap(),
    );
    assert_eq!(ok.previous_hash, h0);
    assert_eq!(ok.hash, hash_bytes(b"Updated"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "Updated");

    handle.shutdown().await;
}

#[tokio::test]
async fn update_with_stale_hash_is_contention_and_leaves_the_file() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");

    // The agent read "Original"; another writer changed it since.
    let h0 = hash_bytes(b"Original");
    std::fs::write(&file, "Externally modified").unwrap();

    let contention = unwrap_contention(
        handle
            .update(update_content_req(&file, h0.clone(), "Agent's intended update"))
            .await
            .unwrap(),
    );
    assert_eq!(contention.expected_hash, h0);
    assert_eq!(contention.current_hash, hash_bytes(b"Externally modified"));
    assert!(contention.diff.summary().regions_changed > 0);
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "Externally modified"
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn patch_contention_reports_conflicting_and_surviving_patches() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");

    // Hash taken against "Line 1\nLine 2\nLine 3"; the file lost Line 2.
    let h0 = hash_bytes(b"Line 1\nLine 2\nLine 3");
    std::fs::write(&file, "Line 1\nLine 3").unwrap();

    let contention = unwrap_contention(
        handle
            .update(update_patches_req(
                &file,
                h0,
                vec![("Line 1", "First"), ("Line 2", "Second"), ("Line 3", "Third")],
            ))
            .await
            .unwrap(),
    );
    assert_eq!(contention.patches_applicable, Some(false));
    let conflicts = contention.conflicts.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].patch_index, 1);
    assert_eq!(conflicts[0].reason, "old_string not found in current file content");
    assert_eq!(contention.non_conflicting_patches, Some(vec![0, 2]));

    handle.shutdown().await;
}

#[tokio::test]
async fn update_applies_patches_sequentially() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");
    let body = "alpha beta alpha";
    std::fs::write(&file, body).unwrap();

    let ok = unwrap_ok(
        handle
            .update(update_patches_req(
                &file,
                hash_bytes(body.as_bytes()),
                vec![("alpha", "gamma"), ("beta", "delta")],
            ))
            .await
            .unwrap(),
    );
    // First occurrence only.
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "gamma delta alpha");
    assert_eq!(ok.hash, hash_bytes(b"gamma delta alpha"));

    handle.shutdown().await;
}

#[tokio::test]
async fn update_with_a_missing_old_string_is_invalid_patch() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");
    std::fs::write(&file, "content").unwrap();

    let err = unwrap_error(
        handle
            .update(update_patches_req(
                &file,
                hash_bytes(b"content"),
                vec![("absent", "x")],
            ))
            .await
            .unwrap(),
    );
    assert_eq!(err.error_code, "INVALID_PATCH");
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "content");

    handle.shutdown().await;
}

#[tokio::test]
async fn update_requires_exactly_one_of_content_or_patches() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");
    std::fs::write(&file, "content").unwrap();

    let req = UpdateRequest {
        path: file.clone(),
        expected_hash: hash_bytes(b"content"),
        content: None,
        patches: None,
        encoding: "utf-8".to_string(),
        timeout: None,
        diff_format: DiffFormat::Json,
    };
    let err = unwrap_error(handle.update(req).await.unwrap());
    assert_eq!(err.error_code, "CONTENT_OR_PATCHES_REQUIRED");

    handle.shutdown().await;
}

#[tokio::test]
async fn delete_without_expected_hash_is_unconditional() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doomed.txt");
    std::fs::write(&file, "bytes").unwrap();

    let ok = unwrap_ok(handle.delete(delete_req(&file, None)).await.unwrap());
    assert_eq!(ok.deleted_hash, hash_bytes(b"bytes"));
    assert!(!file.exists());

    handle.shutdown().await;
}

#[tokio::test]
async fn delete_with_stale_hash_preserves_the_file() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("survivor.txt");
    std::fs::write(&file, "current content").unwrap();

    let contention = unwrap_contention(
        handle
            .delete(delete_req(&file, Some(hash_bytes(b"stale view"))))
            .await
            .unwrap(),
    );
    assert_eq!(contention.current_hash, hash_bytes(b"current content"));
    assert!(file.exists());

    handle.shutdown().await;
}

#[tokio::test]
async fn rename_moves_the_file_and_its_registry_entry() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let old = dir.path().join("old.txt");
    let new = dir.path().join("new.txt");

    unwrap_ok(handle.write(write_req(&old, "payload")).await.unwrap());
    let ok = unwrap_ok(handle.rename(rename_req(&old, &new, false)).await.unwrap());
    assert_eq!(ok.hash, hash_bytes(b"payload"));
    assert!(!ok.cross_filesystem);
    assert!(!old.exists());
    assert_eq!(std::fs::read_to_string(&new).unwrap(), "payload");

    // Registry entry followed the file.
    let status = unwrap_ok(
        handle
            .status(StatusRequest {
                path: Some(new.clone()),
            })
            .await
            .unwrap(),
    );
    let StatusOk::File(file_status) = status else {
        panic!("expected file status");
    };
    assert_eq!(file_status.hash, Some(hash_bytes(b"payload")));

    handle.shutdown().await;
}

#[tokio::test]
async fn rename_refuses_to_clobber_without_overwrite() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let old = dir.path().join("old.txt");
    let new = dir.path().join("occupied.txt");
    std::fs::write(&old, "source").unwrap();
    std::fs::write(&new, "in the way").unwrap();

    let err = unwrap_error(handle.rename(rename_req(&old, &new, false)).await.unwrap());
    assert_eq!(err.error_code, "FILE_EXISTS");
    assert_eq!(std::fs::read_to_string(&new).unwrap(), "in the way");

    let ok = unwrap_ok(handle.rename(rename_req(&old, &new, true)).await.unwrap());
    assert_eq!(ok.hash, hash_bytes(b"source"));
    assert_eq!(std::fs::read_to_string(&new).unwrap(), "source");

    handle.shutdown().await;
}

#[tokio::test]
async fn rename_with_stale_hash_is_contention() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let old = dir.path().join("old.txt");
    let new = dir.path().join("new.txt");
    std::fs::write(&old, "current").unwrap();

    let mut req = rename_req(&old, &new, false);
    req.expected_hash = Some(hash_bytes(b"stale"));
    let contention = unwrap_contention(handle.rename(req).await.unwrap());
    assert_eq!(contention.current_hash, hash_bytes(b"current"));
    assert!(old.exists());
    assert!(!new.exists());

    handle.shutdown().await;
}

#[tokio::test]
async fn append_skips_separator_on_empty_and_uses_it_after() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("log.txt");

    // Missing file without create_if_missing.
    let err = unwrap_error(
        handle
            .append(append_req(&file, "first", "\n---\n", false))
            .await
            .unwrap(),
    );
    assert_eq!(err.error_code, "FILE_NOT_FOUND");

    // Created empty, so the separator is omitted.
    let ok = unwrap_ok(
        handle
            .append(append_req(&file, "first", "\n---\n", true))
            .await
            .unwrap(),
    );
    assert_eq!(ok.bytes_appended, 5);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "first");

    // Non-empty now: separator goes between old tail and new content.
    let ok = unwrap_ok(
        handle
            .append(append_req(&file, "second", "\n---\n", false))
            .await
            .unwrap(),
    );
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "first\n---\nsecond");
    assert_eq!(ok.total_size_bytes, "first\n---\nsecond".len() as u64);
    assert_eq!(ok.hash, hash_bytes(b"first\n---\nsecond"));

    handle.shutdown().await;
}

#[tokio::test]
async fn list_filters_by_glob_and_attaches_registry_hashes() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);

    unwrap_ok(
        handle
            .write(write_req(&dir.path().join("a.rs"), "fn a() {}"))
            .await
            .unwrap(),
    );
    std::fs::write(dir.path().join("b.txt"), "untracked").unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();

    let ok = unwrap_ok(
        handle
            .list(ListRequest {
                path: dir.path().to_path_buf(),
                pattern: "*.rs".to_string(),
                recursive: false,
                include_hashes: true,
            })
            .await
            .unwrap(),
    );
    assert_eq!(ok.total_entries, 1);
    assert_eq!(ok.entries[0].name, "a.rs");
    assert_eq!(ok.entries[0].hash, Some(hash_bytes(b"fn a() {}")));

    // Unfiltered listing sees all three entries; the untracked file has
    // no hash.
    let ok = unwrap_ok(
        handle
            .list(ListRequest {
                path: dir.path().to_path_buf(),
                pattern: "*".to_string(),
                recursive: false,
                include_hashes: true,
            })
            .await
            .unwrap(),
    );
    assert_eq!(ok.total_entries, 3);
    let untracked = ok.entries.iter().find(|e| e.name == "b.txt").unwrap();
    assert!(untracked.hash.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn list_missing_directory_is_dir_not_found() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);

    let err = unwrap_error(
        handle
            .list(ListRequest {
                path: dir.path().join("nope"),
                pattern: "*".to_string(),
                recursive: false,
                include_hashes: false,
            })
            .await
            .unwrap(),
    );
    assert_eq!(err.error_code, "DIR_NOT_FOUND");

    handle.shutdown().await;
}

#[tokio::test]
async fn recursive_list_reports_relative_names() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let sub = dir.path().join("nested");
    std::fs::create_dir(&sub).unwrap();
    std::fs::write(sub.join("inner.txt"), "x").unwrap();

    let ok = unwrap_ok(
        handle
            .list(ListRequest {
                path: dir.path().to_path_buf(),
                pattern: "*.txt".to_string(),
                recursive: true,
                include_hashes: false,
            })
            .await
            .unwrap(),
    );
    assert_eq!(ok.total_entries, 1);
    let name = &ok.entries[0].name;
    assert!(name == "nested/inner.txt" || name == "nested\\inner.txt");

    handle.shutdown().await;
}

#[tokio::test]
async fn global_status_reports_tracked_files_and_lock_counts() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    unwrap_ok(
        handle
            .write(write_req(&dir.path().join("tracked.txt"), "x"))
            .await
            .unwrap(),
    );

    let status = unwrap_ok(handle.status(StatusRequest { path: None }).await.unwrap());
    let StatusOk::Server(server) = status else {
        panic!("expected server status");
    };
    assert_eq!(server.tracked_files, 1);
    assert_eq!(server.active_locks.read, 0);
    assert_eq!(server.active_locks.write, 0);
    assert_eq!(server.server.transport, "in-process");
    assert_eq!(server.server.persistence, "disabled");
    assert_eq!(server.base_directories.len(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn batch_write_continues_past_failures() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let blocked = dir.path().join("blocked.txt");
    std::fs::write(&blocked, "present").unwrap();

    let ok = unwrap_ok(
        handle
            .batch_write(BatchWriteRequest {
                files: vec![
                    BatchWriteItem {
                        path: dir.path().join("fresh.txt"),
                        content: "new".to_string(),
                        encoding: "utf-8".to_string(),
                        create_dirs: true,
                    },
                    BatchWriteItem {
                        path: blocked.clone(),
                        content: "clobber".to_string(),
                        encoding: "utf-8".to_string(),
                        create_dirs: true,
                    },
                ],
                timeout: None,
            })
            .await
            .unwrap(),
    );
    assert_eq!(ok.summary.total, 2);
    assert_eq!(ok.summary.succeeded, 1);
    assert_eq!(ok.summary.failed, 1);
    assert!(dir.path().join("fresh.txt").exists());
    assert_eq!(std::fs::read_to_string(&blocked).unwrap(), "present");

    handle.shutdown().await;
}

#[tokio::test]
async fn batch_update_counts_contention_separately() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let clean = dir.path().join("clean.txt");
    let contended = dir.path().join("contended.txt");
    std::fs::write(&clean, "one").unwrap();
    std::fs::write(&contended, "changed since read").unwrap();

    let ok = unwrap_ok(
        handle
            .batch_update(BatchUpdateRequest {
                files: vec![
                    BatchUpdateItem {
                        path: clean.clone(),
                        expected_hash: hash_bytes(b"one"),
                        content: Some("two".to_string()),
                        patches: None,
                        encoding: "utf-8".to_string(),
                    },
                    BatchUpdateItem {
                        path: contended.clone(),
                        expected_hash: hash_bytes(b"stale"),
                        content: Some("never lands".to_string()),
                        patches: None,
                        encoding: "utf-8".to_string(),
                    },
                ],
                timeout: None,
                diff_format: DiffFormat::Json,
            })
            .await
            .unwrap(),
    );
    assert_eq!(ok.summary.total, 2);
    assert_eq!(ok.summary.succeeded, 1);
    assert_eq!(ok.summary.contention, 1);
    assert_eq!(ok.summary.failed, 0);
    assert_eq!(std::fs::read_to_string(&clean).unwrap(), "two");
    assert_eq!(
        std::fs::read_to_string(&contended).unwrap(),
        "changed since read"
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn access_rules_deny_destructive_operations() {
    let dir = tempdir().unwrap();
    let protected = dir.path().join("protected");
    std::fs::create_dir(&protected).unwrap();
    let target = protected.join("keep.txt");
    std::fs::write(&target, "immortal").unwrap();

    let mut settings = test_settings(dir.path());
    settings.crud.access_rules = vec![PathRule {
        path: protected.clone(),
        operations: vec!["delete".to_string(), "rename".to_string()],
        action: AccessAction::Deny,
        priority: 10,
    }];
    let handle = ServiceHandle::builder().with_settings(settings).build();

    let err = unwrap_error(handle.delete(delete_req(&target, None)).await.unwrap());
    assert_eq!(err.error_code, "ACCESS_DENIED");
    assert!(target.exists());

    let err = unwrap_error(
        handle
            .rename(rename_req(&target, &dir.path().join("moved.txt"), false))
            .await
            .unwrap(),
    );
    assert_eq!(err.error_code, "ACCESS_DENIED");

    // Updates are not named by the rule and fall through to the default
    // allow policy.
    let ok = unwrap_ok(
        handle
            .update(update_content_req(&target, hash_bytes(b"immortal"), "still here"))
            .await
            .unwrap(),
    );
    assert_eq!(ok.hash, hash_bytes(b"still here"));

    handle.shutdown().await;
}

#[tokio::test]
async fn unified_diff_contention_carries_headers_and_summary() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");
    std::fs::write(&file, "current line\n").unwrap();

    let mut req = update_content_req(&file, hash_bytes(b"old line\n"), "intended line\n");
    req.diff_format = DiffFormat::Unified;
    let contention = unwrap_contention(handle.update(req).await.unwrap());

    let fsbroker_core::Diff::Unified { content, summary } = contention.diff else {
        panic!("expected unified diff");
    };
    assert!(content.contains("--- expected"));
    assert!(content.contains("+++ current"));
    assert_eq!(summary.regions_changed, 1);
    // One replaced line: the hunk's raw +1/-1 folds into a modification.
    assert_eq!(summary.lines_modified, 1);
    assert_eq!(summary.lines_added, 0);
    assert_eq!(summary.lines_removed, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn unified_contention_summary_is_derived_per_hunk() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let file = dir.path().join("doc.txt");

    // Relative to the agent's intended body, the file on disk gained a
    // first line and lost the last one: an add-only hunk and a
    // remove-only hunk too far apart to merge. Per-hunk folding keeps
    // them as one add and one remove, never a modification.
    let intended = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\nlast\n";
    let current = "first\n1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\n";
    std::fs::write(&file, current).unwrap();

    let mut req = update_content_req(&file, hash_bytes(intended.as_bytes()), intended);
    req.diff_format = DiffFormat::Unified;
    let contention = unwrap_contention(handle.update(req).await.unwrap());

    let fsbroker_core::Diff::Unified { summary, .. } = contention.diff else {
        panic!("expected unified diff");
    };
    assert_eq!(summary.regions_changed, 2);
    assert_eq!(summary.lines_added, 1);
    assert_eq!(summary.lines_removed, 1);
    assert_eq!(summary.lines_modified, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn persistence_round_trips_the_registry_across_restarts() {
    let dir = tempdir().unwrap();
    let state_file = dir.path().join("state").join("state.json");
    let file = dir.path().join("durable.txt");

    let mut settings = test_settings(dir.path());
    settings.persistence.enabled = true;
    settings.persistence.state_file = Some(state_file.clone());

    let handle = ServiceHandle::builder()
        .with_settings(settings.clone())
        .build();
    unwrap_ok(handle.write(write_req(&file, "survives")).await.unwrap());
    handle.shutdown().await;

    // Shutdown flushes; wait for the actor thread to finish the save.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !state_file.exists() && std::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    assert!(state_file.exists(), "state file was not flushed on shutdown");

    // A fresh service recovers the registry from disk.
    let handle = ServiceHandle::builder().with_settings(settings).build();
    let status = unwrap_ok(
        handle
            .status(StatusRequest {
                path: Some(file.clone()),
            })
            .await
            .unwrap(),
    );
    let StatusOk::File(file_status) = status else {
        panic!("expected file status");
    };
    assert_eq!(file_status.hash, Some(hash_bytes(b"survives")));

    let status = unwrap_ok(handle.status(StatusRequest { path: None }).await.unwrap());
    let StatusOk::Server(server) = status else {
        panic!("expected server status");
    };
    assert_eq!(server.server.persistence, "enabled");
    assert_eq!(server.tracked_files, 1);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn watcher_feeds_external_modifications_into_contention_checks() {
    init_tracing();
    let dir = tempdir().unwrap();
    let file = dir.path().join("shared.txt");

    let mut settings = test_settings(dir.path());
    settings.watcher.enabled = true;
    settings.watcher.debounce_ms = 50;
    let handle = ServiceHandle::builder().with_settings(settings).build();

    unwrap_ok(handle.write(write_req(&file, "agent view")).await.unwrap());

    // An external process rewrites the file behind the service's back.
    std::fs::write(&file, "external edit").unwrap();

    // The watcher refreshes the registered hash once the debounce window
    // drains.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    let mut refreshed = false;
    while std::time::Instant::now() < deadline {
        let status = unwrap_ok(
            handle
                .status(StatusRequest {
                    path: Some(file.clone()),
                })
                .await
                .unwrap(),
        );
        let StatusOk::File(file_status) = status else {
            panic!("expected file status");
        };
        if file_status.hash == Some(hash_bytes(b"external edit")) {
            refreshed = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(refreshed, "watcher did not refresh the registry hash");

    // A stale update now surfaces as contention with the current hash.
    let contention = unwrap_contention(
        handle
            .update(update_content_req(
                &file,
                hash_bytes(b"agent view"),
                "lost update",
            ))
            .await
            .unwrap(),
    );
    assert_eq!(contention.current_hash, hash_bytes(b"external edit"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "external edit");

    handle.shutdown().await;
}

#[tokio::test]
async fn events_are_published_for_tracked_changes() {
    let dir = tempdir().unwrap();
    let handle = handle_for(&dir);
    let mut events = handle.subscribe_events();
    let file = dir.path().join("evented.txt");

    unwrap_ok(handle.write(write_req(&file, "v1")).await.unwrap());
    let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
        .await
        .expect("no event within timeout")
        .unwrap();
    assert_eq!(event.kind, crate::watcher::FileEventKind::Created);
    assert_eq!(event.path, canonicalized(&file));

    handle.shutdown().await;
}

fn canonicalized(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
