//! Storage folder backed by a local directory tree.

use super::{Folder, StorageObject};
use crate::utils::errors::{RestoreError, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct LocalFolder {
    root: PathBuf,
}

impl LocalFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key below the root, refusing keys that would escape it.
    fn object_path(&self, name: &str) -> Result<PathBuf> {
        let key = Path::new(name);
        let escapes = key
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(RestoreError::Storage(format!("invalid object key '{name}'")));
        }
        Ok(self.root.join(key))
    }
}

impl Folder for LocalFolder {
    fn sub_folder(&self, name: &str) -> Arc<dyn Folder> {
        Arc::new(LocalFolder::new(self.root.join(name)))
    }

    fn list_objects(&self) -> Result<Vec<StorageObject>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| RestoreError::Storage(format!("listing failed: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let metadata = entry
                .metadata()
                .map_err(|e| RestoreError::Storage(format!("stat of '{name}' failed: {e}")))?;
            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();

            objects.push(StorageObject {
                name,
                size: metadata.len(),
                last_modified,
            });
        }

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.object_path(name)?.is_file())
    }

    fn read_object(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.object_path(name)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RestoreError::Storage(format!(
                "object '{name}' not found in {}",
                self.root.display()
            ))),
            Err(e) => Err(RestoreError::file_op("open object", &path)(e)),
        }
    }

    fn put_object(&self, name: &str, content: &mut dyn Read) -> Result<()> {
        let path = self.object_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(RestoreError::file_op("create folder", parent))?;
        }

        // Readers never observe a half-written object.
        let partial = partial_path(&path);
        let mut file =
            File::create(&partial).map_err(RestoreError::file_op("create object", &partial))?;
        io::copy(content, &mut file).map_err(RestoreError::file_op("write object", &partial))?;
        file.sync_all().map_err(RestoreError::file_op("fsync object", &partial))?;
        fs::rename(&partial, &path).map_err(RestoreError::file_op("publish object", &path))?;

        debug!("Stored object {}", path.display());
        Ok(())
    }
}

/// `part_1.tar.zst` -> `part_1.tar.zst.partial`, unique per object name.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}
