//! Restoration engine: turns archive entries back into a data directory.
//!
//! - `entry`: archive entries and the tar stream adapter
//! - `interpreter`: per-entry dispatch and the session-wide finalize step
//! - `file`: full-file writes and block increments
//! - `increment`: increment stream format
//! - `dirs`, `selection`, `durability`, `tracker`: supporting policy

pub mod dirs;
pub mod durability;
pub mod entry;
pub mod file;
pub mod increment;
pub mod interpreter;
pub mod selection;
pub mod tracker;

pub use durability::{resolve_fsync_mode, FsyncMode, FsyncResolution, FsyncWarning};
pub use entry::{interpret_tar, ArchiveEntry, EntryKind};
pub use interpreter::TarInterpreter;
pub use selection::RestoreSelection;
pub use tracker::{RestoreAction, RestoreOutcome, RestoreSummary, RestoreTracker};
