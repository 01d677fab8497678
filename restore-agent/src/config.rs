//! Configuration management for the restore agent.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides (`RESTORE_AGENT__SECTION__KEY`, e.g.
//! `RESTORE_AGENT__RESTORE__FSYNC_MODE=global`).

use crate::extract::durability::{resolve_fsync_mode, FsyncMode, FsyncResolution};
use crate::extract::increment::DEFAULT_BLOCK_SIZE;
use crate::extract::selection::RestoreSelection;
use crate::utils::errors::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "RESTORE_AGENT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub restore: RestoreConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the storage folder holding `basebackups_005`
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// File sync mode (default, global, disabled)
    #[serde(default)]
    pub fsync_mode: Option<FsyncMode>,

    /// Deprecated: use `fsync_mode = "disabled"`
    #[serde(default)]
    pub tar_disable_fsync: Option<bool>,

    /// Write increments into fresh zero-filled files instead of patching
    /// files restored by an earlier pass
    #[serde(default)]
    pub create_new_incremental_files: bool,

    /// Increment block size in bytes (default: 8KB)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Archive parts restored in parallel
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Restore only these entry names (unset: everything)
    #[serde(default)]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/restore-agent/storage")
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_parallelism() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            fsync_mode: None,
            tar_disable_fsync: None,
            create_new_incremental_files: false,
            block_size: default_block_size(),
            parallelism: default_parallelism(),
            files: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if any), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("restore.files"),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RestoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.restore.block_size == 0 {
            return Err(RestoreError::Config("restore.block_size must be positive".to_string()));
        }
        if self.restore.parallelism == 0 {
            return Err(RestoreError::Config("restore.parallelism must be positive".to_string()));
        }
        Ok(())
    }

    pub fn fsync_resolution(&self) -> FsyncResolution {
        resolve_fsync_mode(self.restore.fsync_mode, self.restore.tar_disable_fsync)
    }

    pub fn selection(&self) -> RestoreSelection {
        RestoreSelection::from_option(self.restore.files.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_toml() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            r#"
[storage]
path = "/srv/backups"

[restore]
fsync_mode = "global"
tar_disable_fsync = true
block_size = 4096
files = ["base/1/16384"]

[log]
level = "debug"
"#
        )?;
        file.flush()?;

        let config = Config::load(Some(file.path()))?;
        assert_eq!(config.storage.path, PathBuf::from("/srv/backups"));
        assert_eq!(config.restore.block_size, 4096);
        assert_eq!(config.restore.parallelism, 4);
        assert_eq!(config.log.level, "debug");

        let resolution = config.fsync_resolution();
        assert_eq!(resolution.mode, FsyncMode::Global);
        assert_eq!(resolution.warnings.len(), 1);

        let selection = config.selection();
        assert!(selection.should_restore("base/1/16384"));
        assert!(!selection.should_restore("base/1/16385"));
        Ok(())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.restore.block_size, 8192);
        assert!(!config.restore.create_new_incremental_files);
        assert!(!config.selection().is_configured());
        assert_eq!(config.fsync_resolution().mode, FsyncMode::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut config = Config::default();
        config.restore.parallelism = 0;
        assert!(matches!(config.validate(), Err(RestoreError::Config(_))));
    }
}
