/*!
Path confinement: every operation's path is resolved to its real
filesystem location (symlinks followed) and checked against the
configured base directories before anything touches the disk.

Resolution happens BEFORE the prefix check; a symlink that lives inside a
base directory but points outside it is rejected.
*/

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PathValidationError {
    #[error("Empty path is not allowed")]
    Empty,

    #[error("Path contains parent directory references after normalization: {path}")]
    ParentComponents { path: PathBuf },

    #[error("Path is outside allowed base directories: {path} (resolved to {resolved})")]
    OutsideBase { path: PathBuf, resolved: PathBuf },
}

/// Expands a leading `~` to the user's home directory. `~user` forms are
/// passed through untouched.
fn expand_user(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        if let Some(dirs) = directories::UserDirs::new() {
            return dirs.home_dir().to_path_buf();
        }
    } else if let Some(rest) = s.strip_prefix("~/").or_else(|| s.strip_prefix("~\\")) {
        if let Some(dirs) = directories::UserDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    path.to_path_buf()
}

/// Resolves symlinks as far as the filesystem allows. For a path whose
/// final components do not exist yet (a file about to be created, or one
/// just deleted), the deepest existing ancestor is canonicalized and the
/// remaining components are re-joined. Used both for validation and as
/// the registry's canonical key.
pub(crate) fn resolve_existing_prefix(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }

    let mut suffix = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        if let Some(name) = current.file_name() {
            suffix.push(name.to_os_string());
        } else {
            return path.to_path_buf();
        }
        let Some(parent) = current.parent() else {
            return path.to_path_buf();
        };
        let parent = parent.to_path_buf();
        if let Ok(resolved) = std::fs::canonicalize(&parent) {
            let mut out = resolved;
            for part in suffix.iter().rev() {
                out.push(part);
            }
            return out;
        }
        current = parent;
    }
}

/// Case normalization for prefix comparison: lowercases on Windows,
/// identity elsewhere.
pub(crate) fn normcase(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(path.to_string_lossy().to_lowercase())
    }
    #[cfg(not(windows))]
    {
        path.to_path_buf()
    }
}

/// Canonical registry key for a path: real location, case-normalized.
pub(crate) fn canonical_key(path: &Path) -> PathBuf {
    normcase(&resolve_existing_prefix(&absolutize(path)))
}

fn absolutize(path: &Path) -> PathBuf {
    let expanded = expand_user(path);
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}

/// Validates paths against a whitelist of base directories.
///
/// With no bases configured, every path is accepted (no confinement).
#[derive(Debug, Clone)]
pub struct PathValidator {
    resolved_bases: Vec<PathBuf>,
}

impl PathValidator {
    /// Bases are themselves expanded and resolved up front so that a base
    /// given as a symlink confines to its real location.
    pub fn new(base_directories: &[PathBuf]) -> Self {
        let resolved_bases = base_directories
            .iter()
            .map(|base| normcase(&resolve_existing_prefix(&absolutize(base))))
            .collect();
        Self { resolved_bases }
    }

    /// Resolves `path` to its real location and confines it to the bases.
    /// Returns the resolved path on success; all downstream component
    /// keys (locks, registry) use this canonical form, so two spellings
    /// of the same real file collide.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, PathValidationError> {
        if path.as_os_str().is_empty() {
            return Err(PathValidationError::Empty);
        }

        let resolved = resolve_existing_prefix(&absolutize(path));

        // canonicalize never emits `..`, but the unresolved tail of a
        // not-yet-existing path could still carry one.
        if resolved
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PathValidationError::ParentComponents {
                path: path.to_path_buf(),
            });
        }

        if self.resolved_bases.is_empty() {
            return Ok(resolved);
        }

        let candidate = normcase(&resolved);
        for base in &self.resolved_bases {
            // starts_with is component-wise, so /foo/bar never admits
            // /foo/barbaz.
            if candidate == *base || candidate.starts_with(base) {
                return Ok(resolved);
            }
        }

        Err(PathValidationError::OutsideBase {
            path: path.to_path_buf(),
            resolved,
        })
    }

    pub fn base_directories(&self) -> &[PathBuf] {
        &self.resolved_bases
    }
}
