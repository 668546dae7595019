/*!
Diff engine: structured (JSON) and unified text diffs for contention
responses, plus patch-applicability checks.

JSON mode runs an LCS diff over logical lines and maps each non-equal
opcode to a tagged change region with 1-based line numbers and up to N
context lines from the adjacent equal blocks. Unified mode emits a
standard `--- expected` / `+++ current` diff and derives its summary by
parsing the emitted text.

Patch applicability is decided by substring containment of each patch's
`old_string`, evaluated sequentially against the hypothetical result of
the earlier patches. An external `patch --dry-run` helper exists for
unified-diff strings but is advisory only and never overrides the
substring result.
*/

use std::io::Write as _;
use std::process::{Command, Stdio};

use fsbroker_core::{
    Diff, DiffChange, DiffChangeKind, DiffFormat, DiffSummary, Patch, PatchConflict,
};
use similar::{capture_diff_slices, Algorithm, DiffTag, TextDiff};

use crate::text::split_logical_lines;

pub fn compute_diff(old_content: &str, new_content: &str, format: DiffFormat, context_lines: usize) -> Diff {
    match format {
        DiffFormat::Json => compute_json_diff(old_content, new_content, context_lines),
        DiffFormat::Unified => compute_unified_diff(old_content, new_content, context_lines),
    }
}

pub fn compute_json_diff(old_content: &str, new_content: &str, context_lines: usize) -> Diff {
    let old_lines = split_logical_lines(old_content);
    let new_lines = split_logical_lines(new_content);

    let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);

    let mut changes: Vec<DiffChange> = Vec::new();
    let mut summary = DiffSummary::default();

    for (idx, op) in ops.iter().enumerate() {
        let tag = op.tag();
        if tag == DiffTag::Equal {
            continue;
        }
        let old_range = op.old_range();
        let new_range = op.new_range();

        // Context comes from the adjacent equal blocks, when present.
        let context_before = idx.checked_sub(1).and_then(|prev| {
            let prev_op = &ops[prev];
            if prev_op.tag() != DiffTag::Equal {
                return None;
            }
            let range = prev_op.old_range();
            let start = range.end.saturating_sub(context_lines).max(range.start);
            (start < range.end).then(|| old_lines[start..range.end].join("\n"))
        });
        let context_after = ops.get(idx + 1).and_then(|next_op| {
            if next_op.tag() != DiffTag::Equal {
                return None;
            }
            let range = next_op.old_range();
            let end = (range.start + context_lines).min(range.end);
            (range.start < end).then(|| old_lines[range.start..end].join("\n"))
        });

        let change = match tag {
            DiffTag::Insert => {
                summary.lines_added += new_range.len();
                DiffChange {
                    kind: DiffChangeKind::Added,
                    start_line: new_range.start + 1,
                    end_line: (new_range.end > new_range.start + 1).then_some(new_range.end),
                    old_content: None,
                    new_content: Some(new_lines[new_range.clone()].join("\n")),
                    context_before,
                    context_after,
                }
            }
            DiffTag::Delete => {
                summary.lines_removed += old_range.len();
                DiffChange {
                    kind: DiffChangeKind::Removed,
                    start_line: old_range.start + 1,
                    end_line: (old_range.end > old_range.start + 1).then_some(old_range.end),
                    old_content: Some(old_lines[old_range.clone()].join("\n")),
                    new_content: None,
                    context_before,
                    context_after,
                }
            }
            DiffTag::Replace => {
                summary.lines_modified += old_range.len().max(new_range.len());
                DiffChange {
                    kind: DiffChangeKind::Modified,
                    start_line: old_range.start + 1,
                    end_line: (old_range.end > old_range.start + 1).then_some(old_range.end),
                    old_content: Some(old_lines[old_range.clone()].join("\n")),
                    new_content: Some(new_lines[new_range.clone()].join("\n")),
                    context_before,
                    context_after,
                }
            }
            DiffTag::Equal => continue,
        };
        changes.push(change);
    }

    summary.regions_changed = changes.len();
    Diff::Json { changes, summary }
}

pub fn compute_unified_diff(old_content: &str, new_content: &str, context_lines: usize) -> Diff {
    let diff = TextDiff::from_lines(old_content, new_content);
    let mut unified = diff.unified_diff();
    unified.context_radius(context_lines).header("expected", "current");
    let content = unified.to_string();

    // Derive the summary from the emitted text: one region per hunk
    // header. Raw +/- counts fold into modifications WITHIN each hunk,
    // so a pure-add hunk and a pure-remove hunk elsewhere never pair up.
    let mut summary = DiffSummary::default();
    let mut hunk_added = 0usize;
    let mut hunk_removed = 0usize;
    let mut in_hunk = false;
    for line in content.lines() {
        if line.starts_with("@@") {
            if in_hunk {
                fold_hunk(&mut summary, hunk_added, hunk_removed);
            }
            in_hunk = true;
            hunk_added = 0;
            hunk_removed = 0;
            summary.regions_changed += 1;
        } else if line.starts_with('+') && !line.starts_with("+++") {
            hunk_added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            hunk_removed += 1;
        }
    }
    if in_hunk {
        fold_hunk(&mut summary, hunk_added, hunk_removed);
    }

    Diff::Unified { content, summary }
}

/// Folds one hunk's raw +/- counts into the summary: overlapping lines
/// count as modifications, the remainder as pure adds/removes.
fn fold_hunk(summary: &mut DiffSummary, raw_added: usize, raw_removed: usize) {
    let modified = raw_added.min(raw_removed);
    summary.lines_added += raw_added - modified;
    summary.lines_removed += raw_removed - modified;
    summary.lines_modified += modified;
}

/// Result of evaluating a patch list against a body of text.
#[derive(Debug)]
pub struct PatchCheck {
    pub all_applicable: bool,
    pub non_conflicting: Vec<usize>,
    pub conflicts: Vec<PatchConflict>,
    /// The hypothetical text with every non-conflicting patch applied.
    /// Serves as the "expected" side of a patch-mode contention diff.
    pub applied_text: String,
}

/// Walks the patch list in order against a running copy of `current`.
/// Each applicable patch is applied (first occurrence only) before the
/// next is judged, so later patches see the effect of earlier ones.
pub fn check_patches(current: &str, patches: &[Patch]) -> PatchCheck {
    let mut applied = current.to_string();
    let mut non_conflicting = Vec::new();
    let mut conflicts = Vec::new();

    for (idx, patch) in patches.iter().enumerate() {
        if applied.contains(&patch.old_string) {
            applied = applied.replacen(&patch.old_string, &patch.new_string, 1);
            non_conflicting.push(idx);
        } else {
            conflicts.push(PatchConflict {
                patch_index: idx,
                reason: "old_string not found in current file content".to_string(),
            });
        }
    }

    PatchCheck {
        all_applicable: conflicts.is_empty(),
        non_conflicting,
        conflicts,
        applied_text: applied,
    }
}

/// Applies every patch in order, replacing the first occurrence of each
/// `old_string`. Fails with the index of the first patch whose
/// `old_string` is missing from the then-current text.
pub fn apply_patches(current: &str, patches: &[Patch]) -> Result<String, usize> {
    let mut text = current.to_string();
    for (idx, patch) in patches.iter().enumerate() {
        if !text.contains(&patch.old_string) {
            return Err(idx);
        }
        text = text.replacen(&patch.old_string, &patch.new_string, 1);
    }
    Ok(text)
}

/// Outcome of the advisory external applicability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnifiedPatchOutcome {
    Applicable,
    Conflicting,
    /// The `patch` binary is unavailable or failed to run; the check
    /// could not be evaluated. Callers fall back to [`check_patches`].
    Unable,
}

/// Dry-runs each unified-diff string through the system `patch` binary
/// against a temp copy of `current_content`. Advisory only.
pub fn check_unified_patches(current_content: &str, patches: &[String]) -> Vec<UnifiedPatchOutcome> {
    patches
        .iter()
        .map(|patch| dry_run_patch(current_content, patch))
        .collect()
}

fn dry_run_patch(current_content: &str, patch: &str) -> UnifiedPatchOutcome {
    let mut target = match tempfile::NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return UnifiedPatchOutcome::Unable,
    };
    if target.write_all(current_content.as_bytes()).is_err() {
        return UnifiedPatchOutcome::Unable;
    }

    let child = Command::new("patch")
        .arg("--dry-run")
        .arg(target.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(_) => return UnifiedPatchOutcome::Unable,
    };
    if let Some(stdin) = child.stdin.as_mut() {
        if stdin.write_all(patch.as_bytes()).is_err() {
            let _ = child.kill();
            return UnifiedPatchOutcome::Unable;
        }
    }
    drop(child.stdin.take());

    match child.wait() {
        Ok(status) if status.success() => UnifiedPatchOutcome::Applicable,
        Ok(_) => UnifiedPatchOutcome::Conflicting,
        Err(_) => UnifiedPatchOutcome::Unable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(old: &str, new: &str) -> Patch {
        Patch {
            old_string: old.to_string(),
            new_string: new.to_string(),
        }
    }

    #[test]
    fn json_diff_tags_inserted_lines_as_added() {
        let diff = compute_json_diff("a\nb\n", "a\nx\nb\n", 3);
        let Diff::Json { changes, summary } = diff else {
            panic!("expected json diff");
        };
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, DiffChangeKind::Added);
        assert_eq!(changes[0].start_line, 2);
        assert_eq!(changes[0].new_content.as_deref(), Some("x"));
        assert_eq!(summary.lines_added, 1);
        assert_eq!(summary.regions_changed, 1);
    }

    #[test]
    fn json_diff_tags_removed_and_modified() {
        let diff = compute_json_diff("keep\ndrop\nold\n", "keep\nnew\n", 3);
        let Diff::Json { changes, summary } = diff else {
            panic!("expected json diff");
        };
        // "drop\nold" vs "new" is a single replace region.
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, DiffChangeKind::Modified);
        assert_eq!(changes[0].start_line, 2);
        assert_eq!(changes[0].old_content.as_deref(), Some("drop\nold"));
        assert_eq!(changes[0].new_content.as_deref(), Some("new"));
        assert_eq!(summary.lines_modified, 2);
    }

    #[test]
    fn json_diff_carries_context_from_equal_blocks() {
        let old = "one\ntwo\nthree\nfour\nfive\nsix\nseven\n";
        let new = "one\ntwo\nthree\nfour\nCHANGED\nsix\nseven\n";
        let Diff::Json { changes, .. } = compute_json_diff(old, new, 2) else {
            panic!("expected json diff");
        };
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].context_before.as_deref(), Some("three\nfour"));
        assert_eq!(changes[0].context_after.as_deref(), Some("six\nseven"));
    }

    #[test]
    fn unified_diff_has_expected_headers_and_summary() {
        let Diff::Unified { content, summary } =
            compute_unified_diff("a\nb\nc\n", "a\nx\nc\n", 3)
        else {
            panic!("expected unified diff");
        };
        assert!(content.contains("--- expected"));
        assert!(content.contains("+++ current"));
        assert!(content.contains("@@"));
        // One replaced line: raw +1/-1 folds into a single modification.
        assert_eq!(summary.lines_modified, 1);
        assert_eq!(summary.lines_added, 0);
        assert_eq!(summary.lines_removed, 0);
        assert_eq!(summary.regions_changed, 1);
    }

    #[test]
    fn unified_summary_folds_counts_within_each_hunk() {
        // An add-only hunk at the top and a remove-only hunk at the
        // bottom, far enough apart that they cannot share a hunk. The
        // counts must not fold across hunks into modifications.
        let old = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\nlast\n";
        let new = "first\n1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\n";
        let Diff::Unified { summary, .. } = compute_unified_diff(old, new, 3) else {
            panic!("expected unified diff");
        };
        assert_eq!(summary.regions_changed, 2);
        assert_eq!(summary.lines_added, 1);
        assert_eq!(summary.lines_removed, 1);
        assert_eq!(summary.lines_modified, 0);
    }

    #[test]
    fn identical_inputs_produce_an_empty_diff() {
        let Diff::Json { changes, summary } = compute_json_diff("same\n", "same\n", 3) else {
            panic!("expected json diff");
        };
        assert!(changes.is_empty());
        assert_eq!(summary, DiffSummary::default());
    }

    #[test]
    fn patch_check_reports_conflicts_and_survivors() {
        // The file lost "Line 2": the middle patch conflicts, the others
        // still apply.
        let current = "Line 1\nLine 3";
        let patches = vec![
            patch("Line 1", "First"),
            patch("Line 2", "Second"),
            patch("Line 3", "Third"),
        ];
        let check = check_patches(current, &patches);
        assert!(!check.all_applicable);
        assert_eq!(check.non_conflicting, vec![0, 2]);
        assert_eq!(check.conflicts.len(), 1);
        assert_eq!(check.conflicts[0].patch_index, 1);
        assert_eq!(
            check.conflicts[0].reason,
            "old_string not found in current file content"
        );
        assert_eq!(check.applied_text, "First\nThird");
    }

    #[test]
    fn patches_replace_only_the_first_occurrence() {
        let out = apply_patches("aaa bbb aaa", &[patch("aaa", "XXX")]).unwrap();
        assert_eq!(out, "XXX bbb aaa");
    }

    #[test]
    fn later_patches_see_earlier_results() {
        // The second patch's old_string only exists after the first ran.
        let out = apply_patches("abc", &[patch("abc", "xyz"), patch("xyz", "final")]).unwrap();
        assert_eq!(out, "final");
    }

    #[test]
    fn missing_old_string_fails_with_its_index() {
        let err = apply_patches("abc", &[patch("abc", "x"), patch("nope", "y")]).unwrap_err();
        assert_eq!(err, 1);
    }

    #[test]
    fn external_patch_check_is_advisory() {
        let unified = "--- a\n+++ b\n@@ -1 +1 @@\n-line\n+LINE\n".to_string();
        let outcomes = check_unified_patches("line\n", &[unified]);
        assert_eq!(outcomes.len(), 1);
        // With no `patch` binary on the host this reports Unable, which
        // callers treat as "could not evaluate" and fall back to the
        // substring check.
        assert!(matches!(
            outcomes[0],
            UnifiedPatchOutcome::Applicable | UnifiedPatchOutcome::Unable
        ));
    }
}
