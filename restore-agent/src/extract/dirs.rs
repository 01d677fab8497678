//! Directory preparation for restored paths.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

/// Mode used for every directory the restore creates on its own.
pub const DIR_MASK: u32 = 0o755;

/// Create `dir` and all missing ancestors. Existing directories, including
/// ones created concurrently by another stream, are not an error.
pub fn create_dir_all(dir: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(DIR_MASK).create(dir)
}

/// Make sure the directory that will hold `target_path` exists.
///
/// When `entry_name` and `target_path` are the same path the restore runs in
/// place, relative to the working directory, and nothing is created.
pub fn prepare_dirs(entry_name: &Path, target_path: &Path) -> io::Result<()> {
    if entry_name == target_path {
        return Ok(());
    }
    match target_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => create_dir_all(parent),
        _ => Ok(()),
    }
}
