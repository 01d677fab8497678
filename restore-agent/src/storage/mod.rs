//! Object storage access.
//!
//! The restore engine only needs to list, read and (for staging) write named
//! byte streams. Keys are `/`-separated and relative to the folder.

pub mod local;

use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Read;
use std::sync::Arc;

pub use local::LocalFolder;

/// One object found while listing a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    /// Key relative to the listed folder
    pub name: String,

    /// Size in bytes
    pub size: u64,

    pub last_modified: DateTime<Utc>,
}

/// A prefix in object storage.
pub trait Folder: Send + Sync + fmt::Debug {
    /// Folder for the keys under `name/`.
    fn sub_folder(&self, name: &str) -> Arc<dyn Folder>;

    /// Every object below this folder, recursively. A folder that does not
    /// exist lists as empty.
    fn list_objects(&self) -> Result<Vec<StorageObject>>;

    fn exists(&self, name: &str) -> Result<bool>;

    fn read_object(&self, name: &str) -> Result<Box<dyn Read + Send>>;

    /// Store `content` under `name`, replacing any previous object.
    fn put_object(&self, name: &str, content: &mut dyn Read) -> Result<()>;
}
