//! Restores staged backups from a local storage folder into a data directory.

use restore_agent::backup::sentinel::{BackupSentinel, FileDescription, FilesMetadata};
use restore_agent::backup::{
    list_backups, BASEBACKUPS_PATH, FILES_METADATA_NAME, LATEST_BACKUP, SENTINEL_SUFFIX,
    TAR_PARTITIONS_PATH,
};
use restore_agent::extract::increment::write_increment;
use restore_agent::extract::{FsyncMode, RestoreSelection};
use restore_agent::storage::{Folder, LocalFolder};
use restore_agent::{RestoreExecutor, RestoreOptions, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

enum Item<'a> {
    File(&'a str, &'a [u8], u32),
    Dir(&'a str),
    Symlink(&'a str, &'a str),
}

fn tar_of(items: &[Item<'_>]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for item in items {
        let mut header = Header::new_gnu();
        match item {
            Item::File(name, data, mode) => {
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, name, *data).expect("append file");
            }
            Item::Dir(name) => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o700);
                header.set_size(0);
                builder.append_data(&mut header, name, std::io::empty()).expect("append dir");
            }
            Item::Symlink(name, target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, name, target).expect("append symlink");
            }
        }
    }
    builder.into_inner().expect("finish tar")
}

struct Staged {
    _storage: TempDir,
    base: Arc<dyn Folder>,
}

impl Staged {
    fn new() -> Result<Self> {
        let storage = TempDir::new()?;
        let base: Arc<dyn Folder> =
            Arc::new(LocalFolder::new(storage.path().join(BASEBACKUPS_PATH)));
        Ok(Self { _storage: storage, base })
    }

    fn put(
        &self,
        name: &str,
        sentinel: &BackupSentinel,
        metadata: &FilesMetadata,
        parts: &[(Vec<u8>, bool)],
    ) -> Result<()> {
        let sentinel = serde_json::to_vec(sentinel)?;
        self.base
            .put_object(&format!("{name}{SENTINEL_SUFFIX}"), &mut sentinel.as_slice())?;
        let metadata = serde_json::to_vec(metadata)?;
        self.base.put_object(
            &format!("{name}/{FILES_METADATA_NAME}"),
            &mut metadata.as_slice(),
        )?;
        for (i, (part, compress)) in parts.iter().enumerate() {
            let (bytes, ext) = if *compress {
                (zstd::stream::encode_all(part.as_slice(), 3)?, ".zst")
            } else {
                (part.clone(), "")
            };
            self.base.put_object(
                &format!("{name}/{TAR_PARTITIONS_PATH}/part_{}.tar{ext}", i + 1),
                &mut bytes.as_slice(),
            )?;
        }
        Ok(())
    }
}

fn options() -> RestoreOptions {
    RestoreOptions {
        fsync_mode: FsyncMode::Default,
        create_new_incremental_files: false,
        block_size: 4,
        parallelism: 3,
        selection: RestoreSelection::all(),
    }
}

fn finished(at: &str) -> BackupSentinel {
    BackupSentinel {
        finish_time: Some(at.parse().expect("valid timestamp")),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_latest_chain_restores_data_directory() -> Result<()> {
    let staged = Staged::new()?;
    let data = TempDir::new()?;

    staged.put(
        "base_000000010000000000000002",
        &finished("2024-05-01T10:00:00Z"),
        &FilesMetadata::default(),
        &[
            (
                tar_of(&[
                    Item::Dir("base"),
                    Item::Dir("base/1"),
                    Item::File("base/1/16384", b"AAAABBBBCCCC", 0o600),
                    Item::File("base/1/16385", b"DROPPED", 0o600),
                    Item::File("PG_VERSION", b"16\n", 0o600),
                ]),
                true,
            ),
            (
                tar_of(&[
                    Item::File("global/pg_control", b"CTRL", 0o600),
                    Item::Symlink("pg_wal", "/mnt/wal"),
                ]),
                false,
            ),
        ],
    )?;

    let mut increment = Vec::new();
    write_increment(&mut increment, 16, 4, &[(1, b"YYYY"), (3, b"DDDD")])?;
    let mut unchanged = Vec::new();
    write_increment(&mut unchanged, 4, 4, &[])?;
    let mut metadata = FilesMetadata::default();
    for name in ["base/1/16384", "global/pg_control"] {
        metadata.files.insert(
            name.to_string(),
            FileDescription {
                is_incremented: true,
                mtime: 1_714_557_600,
            },
        );
    }
    staged.put(
        "base_000000010000000000000004_D_000000010000000000000002",
        &BackupSentinel {
            increment_from: Some("base_000000010000000000000002".to_string()),
            increment_full_name: Some("base_000000010000000000000002".to_string()),
            increment_count: Some(1),
            ..finished("2024-05-02T10:00:00Z")
        },
        &metadata,
        &[
            (
                tar_of(&[
                    Item::Dir("base"),
                    Item::Dir("base/1"),
                    Item::File("base/1/16384", &increment, 0o600),
                    Item::File("PG_VERSION", b"16\n", 0o600),
                ]),
                true,
            ),
            (
                tar_of(&[
                    Item::File("global/pg_control", &unchanged, 0o600),
                    Item::Symlink("pg_wal", "/mnt/wal"),
                ]),
                false,
            ),
        ],
    )?;

    let listed: Vec<String> = list_backups(staged.base.as_ref())?
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(
        listed,
        vec![
            "base_000000010000000000000002",
            "base_000000010000000000000004_D_000000010000000000000002",
        ]
    );

    let executor = RestoreExecutor::new(Arc::clone(&staged.base), data.path(), options());
    let result = executor.restore_chain(LATEST_BACKUP).await?;

    assert_eq!(result.backups.len(), 2);
    assert!(result.summary.is_success());
    assert_eq!(result.summary.increments_applied, 2);
    assert_eq!(result.summary.links_created, 1);
    assert!(!data.path().join("base/1/16385").exists());

    assert_eq!(
        fs::read(data.path().join("base/1/16384"))?,
        b"AAAAYYYYCCCCDDDD"
    );
    assert_eq!(fs::read(data.path().join("global/pg_control"))?, b"CTRL");
    assert_eq!(
        fs::read_link(data.path().join("pg_wal"))?,
        std::path::PathBuf::from("/mnt/wal")
    );
    let mode = fs::metadata(data.path().join("base/1"))?.permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
    Ok(())
}

#[tokio::test]
async fn test_selected_files_only() -> Result<()> {
    let staged = Staged::new()?;
    let data = TempDir::new()?;

    staged.put(
        "base_1",
        &finished("2024-05-01T10:00:00Z"),
        &FilesMetadata::default(),
        &[(
            tar_of(&[
                Item::File("base/1/16384", b"keep", 0o600),
                Item::File("base/1/16385", b"drop", 0o600),
                Item::File("PG_VERSION", b"16\n", 0o640),
            ]),
            true,
        )],
    )?;

    let mut options = options();
    options.selection = RestoreSelection::only(["base/1/16384", "PG_VERSION"]);
    let executor = RestoreExecutor::new(Arc::clone(&staged.base), data.path(), options);
    let result = executor.restore_single("base_1").await?;

    assert_eq!(result.summary.written, 2);
    assert_eq!(result.summary.skipped, 1);
    assert_eq!(fs::read(data.path().join("base/1/16384"))?, b"keep");
    assert!(!data.path().join("base/1/16385").exists());

    let mode = fs::metadata(data.path().join("PG_VERSION"))?.permissions().mode();
    assert_eq!(mode & 0o777, 0o640);
    Ok(())
}

#[tokio::test]
async fn test_missing_backup_fails() -> Result<()> {
    let staged = Staged::new()?;
    let data = TempDir::new()?;

    let executor = RestoreExecutor::new(Arc::clone(&staged.base), data.path(), options());
    assert!(executor.restore_chain("base_missing").await.is_err());
    assert!(executor.restore_chain(LATEST_BACKUP).await.is_err());
    Ok(())
}
