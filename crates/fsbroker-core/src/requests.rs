//! Typed request envelopes for the fsbroker operations.
//!
//! Requests decode from the language-neutral wire shape; optional fields
//! carry their documented defaults via serde. Timeouts are optional at the
//! wire level and resolved against [`crate::Settings`] by the service, so a
//! single config controls both the default and the clamp.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_true() -> bool {
    true
}

fn default_pattern() -> String {
    "*".to_string()
}

/// A textual patch: the first occurrence of `old_string` in the target is
/// replaced with `new_string`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub old_string: String,
    pub new_string: String,
}

/// Output format requested for contention diffs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffFormat {
    #[default]
    Json,
    Unified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub path: PathBuf,
    pub content: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub create_dirs: bool,
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub path: PathBuf,
    pub expected_hash: crate::ContentHash,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub patches: Option<Vec<Patch>>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub diff_format: DiffFormat,
}

/// The mutation an update carries, once the content-XOR-patches rule has
/// been checked.
#[derive(Debug)]
pub enum UpdatePayload<'a> {
    Content(&'a str),
    Patches(&'a [Patch]),
}

impl UpdateRequest {
    /// Enforces that exactly one of `content` / `patches` is populated.
    /// Returns `None` otherwise; callers surface that as
    /// `CONTENT_OR_PATCHES_REQUIRED`.
    pub fn payload(&self) -> Option<UpdatePayload<'_>> {
        match (&self.content, &self.patches) {
            (Some(content), None) => Some(UpdatePayload::Content(content)),
            (None, Some(patches)) => Some(UpdatePayload::Patches(patches)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub expected_hash: Option<crate::ContentHash>,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub diff_format: DiffFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    #[serde(default)]
    pub expected_hash: Option<crate::ContentHash>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub create_dirs: bool,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub diff_format: DiffFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    pub path: PathBuf,
    pub content: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub create_if_missing: bool,
    #[serde(default = "default_true")]
    pub create_dirs: bool,
    /// Inserted between the existing tail and the appended content; never
    /// inside the content itself. Skipped when the file is empty.
    #[serde(default)]
    pub separator: String,
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub path: PathBuf,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_hashes: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReadRequest {
    pub files: Vec<ReadRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchWriteItem {
    pub path: PathBuf,
    pub content: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub create_dirs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchWriteRequest {
    pub files: Vec<BatchWriteItem>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateItem {
    pub path: PathBuf,
    pub expected_hash: crate::ContentHash,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub patches: Option<Vec<Patch>>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    pub files: Vec<BatchUpdateItem>,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub diff_format: DiffFormat,
}
