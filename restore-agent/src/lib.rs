//! Restore Agent Library
//!
//! Rebuilds a database data directory from (possibly incremental) backup
//! archives held in object storage.

pub mod backup;
pub mod compression;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod extract;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{RestoreExecutor, RestoreOptions, RestoreResult};
pub use extract::{ArchiveEntry, EntryKind, TarInterpreter};
pub use utils::errors::RestoreError;
pub type Result<T> = std::result::Result<T, RestoreError>;
