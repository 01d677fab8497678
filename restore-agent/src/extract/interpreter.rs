//! Archive entry interpreter: materializes entries under a data directory.

use super::dirs::{create_dir_all, prepare_dirs};
use super::durability::{FsyncMode, SyncBarrier};
use super::entry::{ArchiveEntry, EntryKind};
use super::file::IncrementalFileApplier;
use super::selection::RestoreSelection;
use super::tracker::{RestoreAction, RestoreOutcome, RestoreTracker};
use crate::backup::sentinel::{BackupSentinel, FilesMetadata};
use crate::utils::errors::{RestoreError, Result};
use std::fs::{self, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Extracts archive entries to disk.
///
/// Clones share the outcome tracker and the global sync barrier, so one
/// interpreter can be cloned per parallel archive stream. Interpreters for
/// later passes of an increment chain are derived with
/// [`TarInterpreter::with_backup`] and keep sharing both.
#[derive(Debug, Clone)]
pub struct TarInterpreter {
    data_directory: PathBuf,
    fsync_mode: FsyncMode,
    selection: Arc<RestoreSelection>,
    base_only: bool,
    applier: IncrementalFileApplier,
    tracker: RestoreTracker,
    sync_barrier: Arc<SyncBarrier>,
}

impl TarInterpreter {
    /// Interpreter for a full backup with no metadata index.
    pub fn new(data_directory: impl Into<PathBuf>, fsync_mode: FsyncMode) -> Self {
        let data_directory = data_directory.into();
        Self {
            sync_barrier: Arc::new(SyncBarrier::new(sync_root(&data_directory))),
            data_directory,
            fsync_mode,
            selection: Arc::new(RestoreSelection::all()),
            base_only: false,
            applier: IncrementalFileApplier::default(),
            tracker: RestoreTracker::new(),
        }
    }

    /// Same session, different backup pass.
    pub fn with_backup(
        &self,
        sentinel: &BackupSentinel,
        files_metadata: Arc<FilesMetadata>,
        create_new_incremental_files: bool,
    ) -> Self {
        Self {
            applier: IncrementalFileApplier::new(
                sentinel,
                files_metadata,
                create_new_incremental_files,
                self.applier.block_size(),
            ),
            ..self.clone()
        }
    }

    pub fn with_selection(mut self, selection: RestoreSelection) -> Self {
        self.selection = Arc::new(selection);
        self
    }

    /// Restore only what a later pass builds on: selected regular files and
    /// the symlinks they are reached through. Directories, hard links and
    /// other symlinks come from the last pass of an increment chain.
    pub fn with_base_only(mut self, base_only: bool) -> Self {
        self.base_only = base_only;
        self
    }

    /// Only meaningful before [`TarInterpreter::with_backup`].
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.applier = IncrementalFileApplier::new(
            &BackupSentinel::default(),
            Arc::new(FilesMetadata::default()),
            false,
            block_size,
        );
        self
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    pub fn fsync_mode(&self) -> FsyncMode {
        self.fsync_mode
    }

    pub fn tracker(&self) -> &RestoreTracker {
        &self.tracker
    }

    /// Materialize one entry. Records exactly one outcome for it.
    pub fn interpret(&self, entry: &ArchiveEntry, reader: &mut dyn Read) -> Result<()> {
        debug!("Interpreting: {}", entry.name);

        match self.dispatch(entry, reader) {
            Ok(action) => {
                if !matches!(action, RestoreAction::Skipped | RestoreAction::Ignored) {
                    self.sync_barrier.note_write();
                }
                self.tracker.record(RestoreOutcome::ok(&entry.name, action));
                Ok(())
            }
            Err(err) => {
                self.tracker
                    .record(RestoreOutcome::failed(&entry.name, self.intended_action(entry), &err));
                Err(err)
            }
        }
    }

    /// Make everything written so far durable, according to the fsync mode.
    ///
    /// Safe to call from every parallel stream: the sync is skipped when
    /// nothing was written since the previous one. Returns `true` if a sync
    /// was issued.
    pub fn finalize(&self) -> Result<bool> {
        if !self.fsync_mode.global() {
            debug!("File sync disabled, skipping global sync");
            return Ok(false);
        }
        let synced = self.sync_barrier.sync()?;
        if synced {
            info!("Synced filesystems after restoring {}", self.data_directory.display());
        }
        Ok(synced)
    }

    fn dispatch(&self, entry: &ArchiveEntry, reader: &mut dyn Read) -> Result<RestoreAction> {
        let target_path = self.target_path(&entry.name)?;

        if self.base_only && !self.needed_by_later_pass(entry) {
            debug!("Skipping '{}': not needed as a base for a later pass", entry.name);
            return Ok(RestoreAction::Skipped);
        }

        match entry.kind {
            EntryKind::RegularFile => self.unwrap_regular_file(entry, reader, &target_path),
            EntryKind::Directory => {
                create_dir_all(&target_path)
                    .map_err(RestoreError::file_op("create directory", &target_path))?;
                fs::set_permissions(&target_path, Permissions::from_mode(entry.mode & 0o7777))
                    .map_err(RestoreError::file_op("chmod", &target_path))?;
                Ok(RestoreAction::DirectoryCreated)
            }
            EntryKind::HardLink => {
                let source = self.target_path(self.link_target(entry)?)?;
                prepare_dirs(Path::new(&entry.name), &target_path)
                    .map_err(RestoreError::file_op("create parent directories", &target_path))?;
                fs::hard_link(&source, &target_path)
                    .map_err(RestoreError::file_op("create hardlink", &target_path))?;
                Ok(RestoreAction::LinkCreated)
            }
            EntryKind::SymbolicLink => {
                let link_target = self.link_target(entry)?;
                prepare_dirs(Path::new(&entry.name), &target_path)
                    .map_err(RestoreError::file_op("create parent directories", &target_path))?;
                create_symlink(link_target, &target_path)?;
                Ok(RestoreAction::LinkCreated)
            }
            EntryKind::Other(flag) => {
                debug!("Ignoring '{}' with entry type {:?}", entry.name, flag as char);
                Ok(RestoreAction::Ignored)
            }
        }
    }

    fn unwrap_regular_file(
        &self,
        entry: &ArchiveEntry,
        reader: &mut dyn Read,
        target_path: &Path,
    ) -> Result<RestoreAction> {
        if !self.selection.should_restore(&entry.name) {
            debug!("Skipping '{}': not selected for restore", entry.name);
            return Ok(RestoreAction::Skipped);
        }
        self.applier
            .apply(entry, reader, target_path, self.fsync_mode.per_file())
    }

    fn needed_by_later_pass(&self, entry: &ArchiveEntry) -> bool {
        match entry.kind {
            EntryKind::RegularFile => true,
            EntryKind::SymbolicLink => self.selection.selects_below(&entry.name),
            EntryKind::Directory | EntryKind::HardLink | EntryKind::Other(_) => false,
        }
    }

    fn intended_action(&self, entry: &ArchiveEntry) -> RestoreAction {
        match entry.kind {
            EntryKind::RegularFile if self.applier.is_increment(&entry.name) => {
                RestoreAction::IncrementApplied
            }
            EntryKind::RegularFile => RestoreAction::Written,
            EntryKind::Directory => RestoreAction::DirectoryCreated,
            EntryKind::HardLink | EntryKind::SymbolicLink => RestoreAction::LinkCreated,
            EntryKind::Other(_) => RestoreAction::Ignored,
        }
    }

    fn link_target<'a>(&self, entry: &'a ArchiveEntry) -> Result<&'a str> {
        entry
            .link_target
            .as_deref()
            .ok_or_else(|| RestoreError::InvalidEntry {
                name: entry.name.clone(),
                reason: "link without a target".to_string(),
            })
    }

    /// `data_directory/name`, refusing names that would leave the data
    /// directory.
    fn target_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::ParentDir));
        if name.is_empty() || escapes {
            return Err(RestoreError::InvalidEntry {
                name: name.to_string(),
                reason: "path leaves the data directory".to_string(),
            });
        }
        Ok(self.data_directory.join(relative))
    }
}

/// Symlink `target_path` -> `link_target`. An identical existing link is
/// left alone; any other existing file is an error.
fn create_symlink(link_target: &str, target_path: &Path) -> Result<()> {
    match symlink(link_target, target_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            match fs::read_link(target_path) {
                Ok(existing) if existing == Path::new(link_target) => {
                    debug!("Symlink {} already in place", target_path.display());
                    Ok(())
                }
                _ => Err(RestoreError::file_op("create symlink", target_path)(e)),
            }
        }
        Err(e) => Err(RestoreError::file_op("create symlink", target_path)(e)),
    }
}

/// Directory whose filesystem the global sync targets. A relative, empty data
/// directory means the working directory.
fn sync_root(data_directory: &Path) -> PathBuf {
    if data_directory.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        data_directory.to_path_buf()
    }
}
