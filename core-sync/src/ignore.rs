//! Paths the engine never syncs.

use serde::{Deserialize, Serialize};

const EDITOR_TEMP_SUFFIXES: &[&str] = &["~", ".swp", ".tmp"];
const BACKUP_MARKER: &str = ".backup.";

/// Filter applied to every relative path before it reaches the queue.
///
/// The engine's metadata directory is always ignored. By default editor
/// scratch files and the resolver's own `<path>.backup.<unixtime>` copies are
/// ignored too, so backups stay local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRules {
    metadata_dir: String,
    /// Skip `*~`, `*.swp`, `*.tmp` and `#*#`
    pub editor_temp_files: bool,
    /// Skip `*.backup.<digits>` and `*.backup.<digits>-<n>`
    pub conflict_backups: bool,
    /// Additional file name suffixes to skip
    pub extra_suffixes: Vec<String>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            metadata_dir: core_runtime::config::DEFAULT_METADATA_DIR_NAME.to_string(),
            editor_temp_files: true,
            conflict_backups: true,
            extra_suffixes: Vec::new(),
        }
    }
}

impl IgnoreRules {
    /// Rules that ignore only the metadata directory.
    pub fn none() -> Self {
        Self {
            editor_temp_files: false,
            conflict_backups: false,
            ..Self::default()
        }
    }

    pub fn with_metadata_dir(mut self, name: impl Into<String>) -> Self {
        self.metadata_dir = name.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.extra_suffixes.push(suffix.into());
        self
    }

    pub fn metadata_dir(&self) -> &str {
        &self.metadata_dir
    }

    /// Whether a root-relative, `/`-separated path is excluded from sync.
    pub fn is_ignored(&self, path: &str) -> bool {
        let first = path.split('/').next().unwrap_or_default();
        if first == self.metadata_dir {
            return true;
        }

        let name = path.rsplit('/').next().unwrap_or(path);
        if self.editor_temp_files && is_editor_temp(name) {
            return true;
        }
        if self.conflict_backups && is_conflict_backup(name) {
            return true;
        }
        self.extra_suffixes
            .iter()
            .any(|suffix| !suffix.is_empty() && name.ends_with(suffix.as_str()))
    }
}

fn is_editor_temp(name: &str) -> bool {
    EDITOR_TEMP_SUFFIXES.iter().any(|s| name.ends_with(s))
        || (name.len() > 1 && name.starts_with('#') && name.ends_with('#'))
}

/// Matches names produced by the conflict resolver's backup step.
pub fn is_conflict_backup(name: &str) -> bool {
    let Some(index) = name.rfind(BACKUP_MARKER) else {
        return false;
    };
    if index == 0 {
        return false;
    }

    let tail = &name[index + BACKUP_MARKER.len()..];
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match tail.split_once('-') {
        Some((stamp, counter)) => all_digits(stamp) && all_digits(counter),
        None => all_digits(tail),
    }
}
