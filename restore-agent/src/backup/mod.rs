//! Backups as laid out in storage.
//!
//! ```text
//! basebackups_005/
//!   NAME_backup_stop_sentinel.json
//!   NAME/files_metadata.json
//!   NAME/tar_partitions/part_1.tar.zst
//!   NAME/tar_partitions/part_2.tar.zst
//! ```

pub mod sentinel;

use crate::compression::{open_decompressed, BoxedReader};
use crate::storage::Folder;
use crate::utils::errors::{RestoreError, Result};
use sentinel::{BackupSentinel, FilesMetadata};
use std::sync::Arc;
use tracing::{debug, warn};

pub use sentinel::FileDescription;

pub const BASEBACKUPS_PATH: &str = "basebackups_005";
pub const SENTINEL_SUFFIX: &str = "_backup_stop_sentinel.json";
pub const FILES_METADATA_NAME: &str = "files_metadata.json";
pub const TAR_PARTITIONS_PATH: &str = "tar_partitions";

/// Alias accepted wherever a backup name is expected.
pub const LATEST_BACKUP: &str = "LATEST";

/// A named backup inside the `basebackups_005` folder.
#[derive(Debug, Clone)]
pub struct Backup {
    pub name: String,
    base_folder: Arc<dyn Folder>,
}

impl Backup {
    /// `base_folder` is the `basebackups_005` folder.
    pub fn new(base_folder: Arc<dyn Folder>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_folder,
        }
    }

    /// Resolve `LATEST` to the newest finished backup.
    pub fn resolve(base_folder: Arc<dyn Folder>, name: &str) -> Result<Self> {
        let name = if name == LATEST_BACKUP {
            latest_backup_name(base_folder.as_ref())?
        } else {
            name.to_string()
        };
        Ok(Self::new(base_folder, name))
    }

    pub fn sentinel_name(&self) -> String {
        format!("{}{}", self.name, SENTINEL_SUFFIX)
    }

    pub fn fetch_sentinel(&self) -> Result<BackupSentinel> {
        let reader = self.base_folder.read_object(&self.sentinel_name())?;
        Ok(serde_json::from_reader(reader)?)
    }

    /// Backups taken without a metadata index restore every file in full.
    pub fn fetch_files_metadata(&self) -> Result<FilesMetadata> {
        let folder = self.base_folder.sub_folder(&self.name);
        if !folder.exists(FILES_METADATA_NAME)? {
            warn!(
                "Backup {} has no {}, treating every file as full",
                self.name, FILES_METADATA_NAME
            );
            return Ok(FilesMetadata::default());
        }
        let reader = folder.read_object(FILES_METADATA_NAME)?;
        Ok(serde_json::from_reader(reader)?)
    }

    /// Names of the archive parts, ordered by part number.
    pub fn tar_partitions(&self) -> Result<Vec<String>> {
        let folder = self.partitions_folder();
        let mut names: Vec<String> = folder
            .list_objects()?
            .into_iter()
            .map(|object| object.name)
            .filter(|name| !name.contains('/'))
            .collect();
        names.sort_by_key(|name| (partition_number(name), name.clone()));

        if names.is_empty() {
            return Err(RestoreError::Storage(format!(
                "backup {} has no tar partitions",
                self.name
            )));
        }
        debug!("Backup {} has {} tar partitions", self.name, names.len());
        Ok(names)
    }

    /// Open one archive part, decompressed according to its extension.
    pub fn open_partition(&self, partition: &str) -> Result<BoxedReader> {
        let raw = self.partitions_folder().read_object(partition)?;
        open_decompressed(partition, raw)
    }

    fn partitions_folder(&self) -> Arc<dyn Folder> {
        self.base_folder
            .sub_folder(&format!("{}/{}", self.name, TAR_PARTITIONS_PATH))
    }
}

/// `part_12.tar.zst` -> 12. Unnumbered names sort last.
fn partition_number(name: &str) -> u64 {
    name.strip_prefix("part_")
        .and_then(|rest| rest.split('.').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Every finished backup in `base_folder` with its sentinel, oldest first.
/// Sentinels without a finish time are ordered by the object's modification
/// time.
pub fn list_backups(base_folder: &dyn Folder) -> Result<Vec<(String, BackupSentinel)>> {
    let mut backups = Vec::new();

    for object in base_folder.list_objects()? {
        let Some(name) = object.name.strip_suffix(SENTINEL_SUFFIX) else {
            continue;
        };
        if name.contains('/') {
            continue;
        }

        let mut sentinel: BackupSentinel =
            serde_json::from_reader(base_folder.read_object(&object.name)?)?;
        sentinel.finish_time.get_or_insert(object.last_modified);
        backups.push((name.to_string(), sentinel));
    }

    backups.sort_by_key(|(_, sentinel)| sentinel.finish_time);
    Ok(backups)
}

/// Name of the backup with the newest finish time.
pub fn latest_backup_name(base_folder: &dyn Folder) -> Result<String> {
    list_backups(base_folder)?
        .pop()
        .map(|(name, _)| name)
        .ok_or_else(|| RestoreError::Storage("no backups found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFolder;
    use tempfile::TempDir;

    fn put_json<T: serde::Serialize>(folder: &dyn Folder, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        folder.put_object(name, &mut bytes.as_slice())
    }

    #[test]
    fn test_partition_order_is_numeric() {
        let mut names = vec!["part_10.tar.zst", "part_2.tar.zst", "part_1.tar.zst", "extra.tar"];
        names.sort_by_key(|n| (partition_number(n), n.to_string()));
        assert_eq!(
            names,
            vec!["part_1.tar.zst", "part_2.tar.zst", "part_10.tar.zst", "extra.tar"]
        );
    }

    #[test]
    fn test_latest_backup_by_finish_time() -> Result<()> {
        let dir = TempDir::new()?;
        let base: Arc<dyn Folder> = Arc::new(LocalFolder::new(dir.path().join(BASEBACKUPS_PATH)));

        for (name, finished) in [
            ("base_older", "2024-01-01T00:00:00Z"),
            ("base_newer", "2024-06-01T00:00:00Z"),
            ("base_middle", "2024-03-01T00:00:00Z"),
        ] {
            let sentinel = BackupSentinel {
                finish_time: Some(finished.parse().expect("valid timestamp")),
                ..Default::default()
            };
            put_json(base.as_ref(), &format!("{name}{SENTINEL_SUFFIX}"), &sentinel)?;
        }

        let backup = Backup::resolve(Arc::clone(&base), LATEST_BACKUP)?;
        assert_eq!(backup.name, "base_newer");
        Ok(())
    }

    #[test]
    fn test_missing_metadata_means_all_full() -> Result<()> {
        let dir = TempDir::new()?;
        let base: Arc<dyn Folder> = Arc::new(LocalFolder::new(dir.path()));
        let backup = Backup::new(base, "base_1");

        assert_eq!(backup.fetch_files_metadata()?, FilesMetadata::default());
        assert!(backup.tar_partitions().is_err());
        Ok(())
    }
}
