use std::fmt;
use std::path::{Path, PathBuf};

use fsbroker_core::{AccessAction, PathRule};
use thiserror::Error;

use crate::path_policy::{canonical_key, normcase};

/// The mutating operations gated by the access policy. Reads are never
/// gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatingOp {
    Write,
    Update,
    Delete,
    Rename,
}

impl MutatingOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutatingOp::Write => "write",
            MutatingOp::Update => "update",
            MutatingOp::Delete => "delete",
            MutatingOp::Rename => "rename",
        }
    }
}

impl fmt::Display for MutatingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone)]
#[error("Operation '{operation}' denied by access policy for {path}")]
pub struct AccessDenied {
    pub operation: MutatingOp,
    pub path: PathBuf,
}

struct CompiledRule {
    prefix: PathBuf,
    operations: Vec<String>,
    action: AccessAction,
}

impl CompiledRule {
    fn matches(&self, path: &Path, op: MutatingOp) -> bool {
        if !(path == self.prefix || path.starts_with(&self.prefix)) {
            return false;
        }
        self.operations
            .iter()
            .any(|o| o == "*" || o == op.as_str())
    }
}

/// Prefix rules gating mutating operations, highest priority first with
/// list order breaking ties. Unmatched operations fall back to the
/// configured default destructive policy.
pub struct AccessPolicy {
    rules: Vec<CompiledRule>,
    default_action: AccessAction,
}

impl AccessPolicy {
    pub fn new(rules: &[PathRule], default_action: AccessAction) -> Self {
        let mut indexed: Vec<(usize, &PathRule)> = rules.iter().enumerate().collect();
        // Stable sort keeps list order within equal priorities.
        indexed.sort_by_key(|(_, r)| std::cmp::Reverse(r.priority));

        let rules = indexed
            .into_iter()
            .map(|(_, r)| CompiledRule {
                prefix: canonical_key(&r.path),
                operations: r.operations.clone(),
                action: r.action,
            })
            .collect();

        Self {
            rules,
            default_action,
        }
    }

    /// Checks a resolved path against the rules. First matching rule wins.
    pub fn check(&self, path: &Path, op: MutatingOp) -> Result<(), AccessDenied> {
        let candidate = normcase(path);
        let action = self
            .rules
            .iter()
            .find(|rule| rule.matches(&candidate, op))
            .map(|rule| rule.action)
            .unwrap_or(self.default_action);

        match action {
            AccessAction::Allow => Ok(()),
            AccessAction::Deny => Err(AccessDenied {
                operation: op,
                path: path.to_path_buf(),
            }),
        }
    }
}
