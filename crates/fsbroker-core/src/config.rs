//! Configuration surface for the fsbroker service.
//!
//! The embedding application is responsible for deciding where
//! configuration comes from; this module only defines the typed sections
//! and a JSON file loader that tolerates `_`/`$`-prefixed comment keys.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a matching access rule permits or refuses the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
    Allow,
    Deny,
}

/// A single prefix-based access control rule for mutating operations.
///
/// Rules are evaluated highest priority first; ties are broken by list
/// order. The `operations` set names `write`, `update`, `delete`,
/// `rename`, or `*` for all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRule {
    pub path: PathBuf,
    pub operations: Vec<String>,
    pub action: AccessAction,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrudConfig {
    /// Absolute directories operations are confined to. Empty disables the
    /// confinement check entirely.
    pub base_directories: Vec<PathBuf>,
    pub default_timeout: f64,
    pub max_timeout: f64,
    pub default_encoding: String,
    pub diff_context_lines: usize,
    pub max_file_size_bytes: u64,
    pub access_rules: Vec<PathRule>,
    pub default_destructive_policy: AccessAction,
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            base_directories: Vec::new(),
            default_timeout: 30.0,
            max_timeout: 300.0,
            default_encoding: "utf-8".to_string(),
            diff_context_lines: 3,
            max_file_size_bytes: 10 * 1024 * 1024,
            access_rules: Vec::new(),
            default_destructive_policy: AccessAction::Allow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Snapshot location; `None` selects `state.json` under the OS data
    /// directory for the application.
    pub state_file: Option<PathBuf>,
    pub write_debounce_seconds: f64,
    pub ttl_multiplier: f64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            state_file: None,
            write_debounce_seconds: 1.0,
            ttl_multiplier: 2.0,
        }
    }
}

impl PersistenceConfig {
    /// Resolves the effective state-file path.
    pub fn state_file_path(&self) -> PathBuf {
        if let Some(path) = &self.state_file {
            return path.clone();
        }
        directories::ProjectDirs::from("", "", "fsbroker")
            .map(|dirs| dirs.data_dir().join("state.json"))
            .unwrap_or_else(|| PathBuf::from("fsbroker-state.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 100,
        }
    }
}

/// Root configuration with nested sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub crud: CrudConfig,
    pub persistence: PersistenceConfig,
    pub watcher: WatcherConfig,
}

impl Settings {
    /// Loads settings from a JSON file, ignoring keys that start with `_`
    /// or `$` (used as inline comments in hand-edited config files). A
    /// missing file yields the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, serde_json::Error> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Ok(Self::default()),
        };
        let value: Value = serde_json::from_str(&raw)?;
        serde_json::from_value(strip_comment_fields(value))
    }

    /// Clamps a requested timeout to the configured maximum, substituting
    /// the default when the caller did not supply one.
    pub fn effective_timeout(&self, requested: Option<f64>) -> f64 {
        requested
            .unwrap_or(self.crud.default_timeout)
            .min(self.crud.max_timeout)
    }
}

fn strip_comment_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !k.starts_with('_') && !k.starts_with('$'))
                .map(|(k, v)| (k, strip_comment_fields(v)))
                .collect(),
        ),
        other => other,
    }
}
