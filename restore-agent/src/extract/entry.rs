//! Archive entries and the tar stream that produces them.

use super::interpreter::TarInterpreter;
use crate::utils::errors::{RestoreError, Result};
use std::io::Read;
use std::path::{Component, Path};
use tar::{Entry, EntryType};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Kind of an archive entry. Anything the restore does not materialize is
/// `Other`, carrying the raw type flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    RegularFile,
    Directory,
    HardLink,
    SymbolicLink,
    Other(u8),
}

impl From<EntryType> for EntryKind {
    fn from(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Regular | EntryType::Continuous => EntryKind::RegularFile,
            EntryType::Directory => EntryKind::Directory,
            EntryType::Link => EntryKind::HardLink,
            EntryType::Symlink => EntryKind::SymbolicLink,
            other => EntryKind::Other(other.as_byte()),
        }
    }
}

/// One file, directory or link from a backup stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the data directory
    pub name: String,

    pub kind: EntryKind,

    /// Permission bits
    pub mode: u32,

    /// Content size in bytes (0 for anything but regular files)
    pub size: u64,

    /// Recorded link name for hard and symbolic links
    pub link_target: Option<String>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind, mode: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            mode,
            size: 0,
            link_target: None,
        }
    }

    pub fn regular_file(name: impl Into<String>, mode: u32, size: u64) -> Self {
        Self {
            size,
            ..Self::new(name, EntryKind::RegularFile, mode)
        }
    }

    pub fn directory(name: impl Into<String>, mode: u32) -> Self {
        Self::new(name, EntryKind::Directory, mode)
    }

    pub fn hard_link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            link_target: Some(target.into()),
            ..Self::new(name, EntryKind::HardLink, 0o644)
        }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            link_target: Some(target.into()),
            ..Self::new(name, EntryKind::SymbolicLink, 0o777)
        }
    }

    /// Build an entry from a tar member. Long names and PAX paths are
    /// already resolved by `tar`.
    pub fn from_tar<R: Read>(entry: &Entry<'_, R>) -> Result<Self> {
        let header = entry.header();
        let path = entry
            .path()
            .map_err(|e| RestoreError::Archive(format!("unreadable entry path: {e}")))?;
        let name = normalize_name(&path);
        let mode = header
            .mode()
            .map_err(|e| RestoreError::Archive(format!("bad mode for '{name}': {e}")))?;
        let link_target = entry
            .link_name()
            .map_err(|e| RestoreError::Archive(format!("bad link name for '{name}': {e}")))?
            .map(|target| target.to_string_lossy().into_owned());

        Ok(Self {
            kind: header.entry_type().into(),
            mode,
            size: entry.size(),
            link_target,
            name,
        })
    }
}

/// Drop `./` prefixes and trailing slashes so names match the metadata index.
fn normalize_name(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Feed every member of a tar stream to `interpreter`, in stream order.
///
/// Stops at the first failing entry, or before the next entry once `cancel`
/// fires. Returns the number of entries interpreted.
pub fn interpret_tar<R: Read>(
    reader: R,
    interpreter: &TarInterpreter,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| RestoreError::Archive(format!("cannot read tar stream: {e}")))?;

    let mut count = 0;
    for entry in entries {
        if cancel.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }
        let mut entry =
            entry.map_err(|e| RestoreError::Archive(format!("corrupt tar entry: {e}")))?;
        let archive_entry = ArchiveEntry::from_tar(&entry)?;
        interpreter.interpret(&archive_entry, &mut entry)?;
        count += 1;
    }

    debug!("Interpreted {} archive entries", count);
    Ok(count)
}
