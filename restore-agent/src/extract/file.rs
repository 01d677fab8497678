//! Regular file restoration: full writes and block increments.
//!
//! A file is restored from its increment only when the backup is incremental
//! and the metadata index marks the file as incremented. Everything else is a
//! plain full-file write.
//!
//! A file present at its final name is assumed to be a complete base version
//! by later increment passes, so a write that fails half-way removes what it
//! wrote. If that removal fails too the error is [`RestoreError::Fatal`].

use super::dirs::prepare_dirs;
use super::entry::ArchiveEntry;
use super::increment::{IncrementHeader, DEFAULT_BLOCK_SIZE};
use super::tracker::RestoreAction;
use crate::backup::sentinel::{BackupSentinel, FilesMetadata};
use crate::utils::errors::{RestoreError, Result};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Mode for newly created files before the entry's own mode is applied.
const FILE_CREATE_MODE: u32 = 0o666;

/// Writes regular files, choosing between full content and increments.
#[derive(Debug, Clone)]
pub struct IncrementalFileApplier {
    incremental_backup: bool,
    files_metadata: Arc<FilesMetadata>,
    create_new_incremental_files: bool,
    block_size: usize,
}

impl Default for IncrementalFileApplier {
    fn default() -> Self {
        Self {
            incremental_backup: false,
            files_metadata: Arc::new(FilesMetadata::default()),
            create_new_incremental_files: false,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl IncrementalFileApplier {
    pub fn new(
        sentinel: &BackupSentinel,
        files_metadata: Arc<FilesMetadata>,
        create_new_incremental_files: bool,
        block_size: usize,
    ) -> Self {
        Self {
            incremental_backup: sentinel.is_incremental(),
            files_metadata,
            create_new_incremental_files,
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the content of `name` is an increment stream.
    pub fn is_increment(&self, name: &str) -> bool {
        self.incremental_backup && self.files_metadata.is_incremented(name)
    }

    /// Restore one regular file to `target_path`.
    pub fn apply(
        &self,
        entry: &ArchiveEntry,
        reader: &mut dyn Read,
        target_path: &Path,
        fsync: bool,
    ) -> Result<RestoreAction> {
        if self.is_increment(&entry.name) {
            self.apply_increment(entry, reader, target_path, fsync)?;
            return Ok(RestoreAction::IncrementApplied);
        }

        prepare_dirs(Path::new(&entry.name), target_path)
            .map_err(RestoreError::file_op("create parent directories", target_path))?;
        let file = create_file(target_path)?;
        write_local_file(reader, entry.mode, file, target_path, fsync)?;
        Ok(RestoreAction::Written)
    }

    fn apply_increment(
        &self,
        entry: &ArchiveEntry,
        reader: &mut dyn Read,
        target_path: &Path,
        fsync: bool,
    ) -> Result<()> {
        let header = IncrementHeader::read_from(reader, self.block_size)
            .map_err(|e| increment_error(target_path, e))?;
        debug!(
            "Applying {} changed blocks to {} (final size {})",
            header.block_numbers.len(),
            target_path.display(),
            header.file_size
        );

        if self.create_new_incremental_files {
            prepare_dirs(Path::new(&entry.name), target_path)
                .map_err(RestoreError::file_op("create parent directories", target_path))?;
            let file = create_file(target_path)?;
            let written = file
                .set_len(header.file_size)
                .map_err(RestoreError::file_op("allocate", target_path))
                .and_then(|()| {
                    header
                        .apply_blocks(reader, &file, self.block_size)
                        .map_err(|e| increment_error(target_path, e))
                });
            if let Err(err) = written {
                drop(file);
                return Err(remove_partial(target_path).unwrap_or(err));
            }
            return finish_file(&file, entry.mode, target_path, fsync);
        }

        let file = match OpenOptions::new().write(true).open(target_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RestoreError::InvalidIncrement {
                    path: target_path.to_path_buf(),
                    reason: "incremented file should already exist".to_string(),
                })
            }
            Err(e) => return Err(RestoreError::file_op("open for increment", target_path)(e)),
        };
        file.set_len(header.file_size)
            .map_err(RestoreError::file_op("resize", target_path))?;
        header
            .apply_blocks(reader, &file, self.block_size)
            .map_err(|e| increment_error(target_path, e))?;
        finish_file(&file, entry.mode, target_path, fsync)
    }
}

/// Copy `reader` into `file`, then apply `mode` and optionally fsync.
///
/// On a failed copy the file at `path` is removed before the copy error is
/// returned.
pub fn write_local_file<R: Read + ?Sized>(
    reader: &mut R,
    mode: u32,
    mut file: File,
    path: &Path,
    fsync: bool,
) -> Result<()> {
    if let Err(copy_err) = io::copy(reader, &mut file) {
        drop(file);
        let err = RestoreError::file_op("copy", path)(copy_err);
        return Err(remove_partial(path).unwrap_or(err));
    }
    finish_file(&file, mode, path, fsync)
}

fn create_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_CREATE_MODE)
        .open(path)
        .map_err(RestoreError::file_op("create file", path))
}

fn finish_file(file: &File, mode: u32, path: &Path, fsync: bool) -> Result<()> {
    file.set_permissions(Permissions::from_mode(mode & 0o7777))
        .map_err(RestoreError::file_op("chmod", path))?;
    if fsync {
        file.sync_all().map_err(RestoreError::file_op("fsync", path))?;
    }
    Ok(())
}

/// Remove a half-written file. Returns the fatal error if that fails.
fn remove_partial(path: &Path) -> Option<RestoreError> {
    match fs::remove_file(path) {
        Ok(()) => None,
        Err(source) => {
            error!(
                "Failed to remove partially written file '{}': {}",
                path.display(),
                source
            );
            Some(RestoreError::Fatal {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

fn increment_error(path: &Path, err: io::Error) -> RestoreError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            RestoreError::InvalidIncrement {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
        _ => RestoreError::file_op("apply increment", path)(err),
    }
}
