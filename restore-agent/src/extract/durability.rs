//! Durability policy for restored files.
//!
//! The effective fsync mode is resolved once per restore session from the
//! `fsync_mode` setting and the deprecated `tar_disable_fsync` boolean. The
//! resolution is a pure function so the precedence rules can be tested without
//! touching the filesystem.

use crate::utils::errors::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// How restored data is made durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsyncMode {
    /// Legacy behavior: fsync every file as it is written, then sync globally.
    #[default]
    #[serde(alias = "DEFAULT")]
    Default,
    /// One whole-filesystem sync after every file has been written.
    #[serde(alias = "GLOBAL")]
    Global,
    /// Never sync. Only for restores that can be thrown away.
    #[serde(alias = "DISABLED")]
    Disabled,
}

impl FsyncMode {
    /// Whether each file is fsynced right after it is written.
    pub fn per_file(self) -> bool {
        self == FsyncMode::Default
    }

    /// Whether `finalize` issues a filesystem-wide sync.
    pub fn global(self) -> bool {
        matches!(self, FsyncMode::Default | FsyncMode::Global)
    }
}

impl fmt::Display for FsyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsyncMode::Default => "default",
            FsyncMode::Global => "global",
            FsyncMode::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

impl FromStr for FsyncMode {
    type Err = RestoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "default" => Ok(FsyncMode::Default),
            "global" => Ok(FsyncMode::Global),
            "disabled" => Ok(FsyncMode::Disabled),
            other => Err(RestoreError::Config(format!("unknown fsync mode '{other}'"))),
        }
    }
}

/// Configuration problems found while resolving the fsync mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsyncWarning {
    /// `tar_disable_fsync` is set at all.
    Deprecated,
    /// `tar_disable_fsync = true` replaced the default mode.
    FallingBack(FsyncMode),
}

impl fmt::Display for FsyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsyncWarning::Deprecated => write!(
                f,
                "tar_disable_fsync is deprecated and uses inefficient fsync-for-every-file logic; \
                 set fsync_mode instead"
            ),
            FsyncWarning::FallingBack(mode) => write!(f, "Falling back to {mode} file sync mode"),
        }
    }
}

/// Outcome of [`resolve_fsync_mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsyncResolution {
    pub mode: FsyncMode,
    pub warnings: Vec<FsyncWarning>,
}

impl FsyncResolution {
    /// Emit every warning through `tracing`.
    pub fn log(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        info!("Using {} file sync mode", self.mode);
    }
}

/// Resolve the effective mode. An unset `mode` means [`FsyncMode::Default`].
///
/// The legacy boolean can only turn the default mode into `Disabled`; an
/// explicit `fsync_mode` always wins.
pub fn resolve_fsync_mode(
    mode: Option<FsyncMode>,
    legacy_disable: Option<bool>,
) -> FsyncResolution {
    let mut resolved = mode.unwrap_or_default();
    let mut warnings = Vec::new();

    if let Some(disable) = legacy_disable {
        warnings.push(FsyncWarning::Deprecated);
        if resolved == FsyncMode::Default && disable {
            resolved = FsyncMode::Disabled;
            warnings.push(FsyncWarning::FallingBack(FsyncMode::Disabled));
        }
    }

    FsyncResolution {
        mode: resolved,
        warnings,
    }
}

/// System-wide sync shared by every interpreter of one session.
///
/// Writers call [`SyncBarrier::note_write`] after each completed file. A sync
/// is only issued when something was written since the previous one, so
/// calling [`SyncBarrier::sync`] once per parallel stream costs a single
/// syscall in total.
#[derive(Debug)]
pub struct SyncBarrier {
    root: PathBuf,
    writes: AtomicU64,
    synced: Mutex<Option<u64>>,
}

impl SyncBarrier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: AtomicU64::new(0),
            synced: Mutex::new(None),
        }
    }

    pub fn note_write(&self) {
        self.writes.fetch_add(1, Ordering::Release);
    }

    /// Sync all filesystems. Returns `true` if a sync was actually issued.
    pub fn sync(&self) -> Result<bool> {
        let mut synced = self
            .synced
            .lock()
            .map_err(|_| RestoreError::Task("sync barrier lock poisoned".to_string()))?;
        let seen = self.writes.load(Ordering::Acquire);
        if *synced == Some(seen) {
            debug!("Nothing written since last global sync, skipping");
            return Ok(false);
        }

        sync_filesystem(&self.root)?;
        *synced = Some(seen);
        Ok(true)
    }
}

/// Flush every filesystem, not only the one holding `root`: tablespace
/// symlinks send restored files onto other mounts. `sync(2)` cannot report
/// failures, so on Linux a `syncfs(2)` of the data directory follows to
/// surface writeback errors there.
fn sync_filesystem(root: &Path) -> Result<()> {
    let dir = File::open(root).map_err(RestoreError::file_op("open for sync", root))?;
    nix::unistd::sync();
    check_writeback(root, &dir)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn check_writeback(root: &Path, dir: &File) -> Result<()> {
    nix::unistd::syncfs(dir).map_err(|errno| RestoreError::GlobalSync {
        path: root.to_path_buf(),
        code: errno as i32,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn check_writeback(_root: &Path, _dir: &File) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unset_everything_is_default() {
        let resolution = resolve_fsync_mode(None, None);
        assert_eq!(resolution.mode, FsyncMode::Default);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_legacy_true_falls_back_to_disabled() {
        let resolution = resolve_fsync_mode(None, Some(true));
        assert_eq!(resolution.mode, FsyncMode::Disabled);
        assert_eq!(
            resolution.warnings,
            vec![
                FsyncWarning::Deprecated,
                FsyncWarning::FallingBack(FsyncMode::Disabled)
            ]
        );
    }

    #[test]
    fn test_explicit_mode_wins_over_legacy() {
        let resolution = resolve_fsync_mode(Some(FsyncMode::Global), Some(true));
        assert_eq!(resolution.mode, FsyncMode::Global);
        assert_eq!(resolution.warnings, vec![FsyncWarning::Deprecated]);
    }

    #[test]
    fn test_legacy_false_never_reenables_sync() {
        let resolution = resolve_fsync_mode(Some(FsyncMode::Disabled), Some(false));
        assert_eq!(resolution.mode, FsyncMode::Disabled);
        assert_eq!(resolution.warnings, vec![FsyncWarning::Deprecated]);

        let resolution = resolve_fsync_mode(None, Some(false));
        assert_eq!(resolution.mode, FsyncMode::Default);
    }

    #[test]
    fn test_mode_flags() {
        assert!(FsyncMode::Default.per_file() && FsyncMode::Default.global());
        assert!(!FsyncMode::Global.per_file() && FsyncMode::Global.global());
        assert!(!FsyncMode::Disabled.per_file() && !FsyncMode::Disabled.global());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("GLOBAL".parse::<FsyncMode>().unwrap(), FsyncMode::Global);
        assert_eq!("disabled".parse::<FsyncMode>().unwrap(), FsyncMode::Disabled);
        assert!("sometimes".parse::<FsyncMode>().is_err());
    }

    #[test]
    fn test_sync_barrier_skips_repeated_syncs() -> Result<()> {
        let dir = TempDir::new()?;
        let barrier = SyncBarrier::new(dir.path());

        assert!(barrier.sync()?);
        assert!(!barrier.sync()?);

        barrier.note_write();
        assert!(barrier.sync()?);
        assert!(!barrier.sync()?);
        Ok(())
    }
}
