//! Backup descriptor and per-file metadata written when a backup completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel stored next to a finished backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupSentinel {
    /// Backup this one is an increment of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment_from: Option<String>,

    /// Full backup at the root of the increment chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment_full_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_local_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

impl BackupSentinel {
    pub fn is_incremental(&self) -> bool {
        self.increment_from.is_some()
    }
}

/// Per-file facts recorded at backup time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileDescription {
    /// The archive holds an increment for this file, not its full content
    #[serde(default)]
    pub is_incremented: bool,

    /// Modification time (seconds since Unix epoch)
    #[serde(default)]
    pub mtime: i64,
}

/// Index of every file in a backup, keyed by archive entry name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilesMetadata {
    #[serde(default)]
    pub files: HashMap<String, FileDescription>,
}

impl FilesMetadata {
    pub fn is_incremented(&self, name: &str) -> bool {
        self.files.get(name).is_some_and(|f| f.is_incremented)
    }

    /// Names stored as increments, which need their previous version
    /// restored first.
    pub fn incremented_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|(_, f)| f.is_incremented)
            .map(|(name, _)| name.as_str())
    }
}
