//! Restore session driver - orchestrates a restore from storage to disk.
//!
//! A session restores one backup, or a whole increment chain, into a data
//! directory:
//! - the chain is resolved by following each sentinel's `IncrementFrom`
//! - every pass streams its tar partitions through one interpreter clone per
//!   partition, on blocking worker threads bounded by a semaphore
//! - the global sync runs once, after the last pass

use crate::backup::sentinel::{BackupSentinel, FilesMetadata};
use crate::backup::Backup;
use crate::config::Config;
use crate::extract::{interpret_tar, FsyncMode, RestoreSelection, RestoreSummary, TarInterpreter};
use crate::storage::Folder;
use crate::utils::errors::{RestoreError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Settings for one restore session, already resolved from configuration.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub fsync_mode: FsyncMode,
    pub create_new_incremental_files: bool,
    pub block_size: usize,
    pub parallelism: usize,
    pub selection: RestoreSelection,
}

impl RestoreOptions {
    /// Resolve the fsync mode (logging any deprecation warnings) and collect
    /// the remaining restore settings.
    pub fn from_config(config: &Config) -> Self {
        let resolution = config.fsync_resolution();
        resolution.log();

        Self {
            fsync_mode: resolution.mode,
            create_new_incremental_files: config.restore.create_new_incremental_files,
            block_size: config.restore.block_size,
            parallelism: config.restore.parallelism,
            selection: config.selection(),
        }
    }
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Selection for each pass of a chain, oldest first. The newest pass
/// restores what the user selected; every earlier pass restores the subset
/// of the next pass's selection that the next pass stores as increments.
fn pass_selections(
    user_selection: &RestoreSelection,
    passes: &[(Backup, BackupSentinel, Arc<FilesMetadata>)],
) -> Vec<RestoreSelection> {
    let mut selections = Vec::with_capacity(passes.len());
    let mut needed = user_selection.clone();
    for (_, _, files_metadata) in passes.iter().rev() {
        let next = needed.restrict_to(files_metadata.incremented_files());
        selections.push(needed);
        needed = next;
    }
    selections.reverse();
    selections
}

/// Restore execution result
#[derive(Debug)]
pub struct RestoreResult {
    /// Backups restored, oldest first
    pub backups: Vec<String>,
    pub summary: RestoreSummary,
    pub duration_secs: u64,
}

/// Main restore executor
pub struct RestoreExecutor {
    base_folder: Arc<dyn Folder>,
    data_directory: PathBuf,
    options: RestoreOptions,
    cancel_token: CancellationToken,
}

impl RestoreExecutor {
    /// `base_folder` is the `basebackups_005` folder.
    pub fn new(
        base_folder: Arc<dyn Folder>,
        data_directory: impl Into<PathBuf>,
        options: RestoreOptions,
    ) -> Self {
        Self {
            base_folder,
            data_directory: data_directory.into(),
            options,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Create a new restore executor with cancellation support
    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Restore `backup_name` and every backup it is an increment of, base
    /// first. Increment passes patch the files of the previous pass in place.
    ///
    /// Earlier passes only unwrap the files a later pass stores as
    /// increments, plus the symlinks leading to them. The data directory ends
    /// up holding exactly what `backup_name` holds.
    pub async fn restore_chain(&self, backup_name: &str) -> Result<RestoreResult> {
        let start_time = std::time::Instant::now();
        let chain = self.backup_chain(backup_name)?;
        info!(
            "Restoring {} into {} ({} backups in chain)",
            backup_name,
            self.data_directory.display(),
            chain.len()
        );

        let mut passes = Vec::with_capacity(chain.len());
        for (backup, sentinel) in chain {
            let files_metadata = Arc::new(backup.fetch_files_metadata()?);
            passes.push((backup, sentinel, files_metadata));
        }
        let selections = pass_selections(&self.options.selection, &passes);

        let session = self.session_interpreter()?;
        let last = passes.len() - 1;
        let mut restored = Vec::with_capacity(passes.len());
        for (i, ((backup, sentinel, files_metadata), selection)) in
            passes.iter().zip(selections).enumerate()
        {
            let interpreter = session
                .with_backup(sentinel, Arc::clone(files_metadata), false)
                .with_selection(selection)
                .with_base_only(i != last);
            self.restore_pass(&interpreter, backup).await?;
            restored.push(backup.name.clone());
        }

        self.finish(&session, restored, start_time)
    }

    /// Restore `backup_name` alone, honoring `create_new_incremental_files`.
    pub async fn restore_single(&self, backup_name: &str) -> Result<RestoreResult> {
        let start_time = std::time::Instant::now();
        let backup = Backup::resolve(Arc::clone(&self.base_folder), backup_name)?;
        let sentinel = backup.fetch_sentinel()?;
        let files_metadata = Arc::new(backup.fetch_files_metadata()?);
        info!(
            "Restoring single pass of {} into {} (incremental: {})",
            backup.name,
            self.data_directory.display(),
            sentinel.is_incremental()
        );

        let session = self.session_interpreter()?;
        let interpreter = session.with_backup(
            &sentinel,
            files_metadata,
            self.options.create_new_incremental_files,
        );
        self.restore_pass(&interpreter, &backup).await?;

        self.finish(&session, vec![backup.name], start_time)
    }

    fn session_interpreter(&self) -> Result<TarInterpreter> {
        std::fs::create_dir_all(&self.data_directory)
            .map_err(RestoreError::file_op("create data directory", &self.data_directory))?;

        Ok(TarInterpreter::new(&self.data_directory, self.options.fsync_mode)
            .with_block_size(self.options.block_size)
            .with_selection(self.options.selection.clone()))
    }

    fn finish(
        &self,
        session: &TarInterpreter,
        backups: Vec<String>,
        start_time: std::time::Instant,
    ) -> Result<RestoreResult> {
        session.finalize()?;

        let summary = session.tracker().snapshot();
        let duration_secs = start_time.elapsed().as_secs();
        info!(
            "Restore finished in {}s: {} written, {} increments, {} skipped, {} directories, \
             {} links",
            duration_secs,
            summary.written,
            summary.increments_applied,
            summary.skipped,
            summary.directories_created,
            summary.links_created
        );

        Ok(RestoreResult {
            backups,
            summary,
            duration_secs,
        })
    }

    /// Backups from the full base to `backup_name`, oldest first.
    fn backup_chain(&self, backup_name: &str) -> Result<Vec<(Backup, BackupSentinel)>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(Backup::resolve(Arc::clone(&self.base_folder), backup_name)?);

        while let Some(backup) = next.take() {
            if !seen.insert(backup.name.clone()) {
                return Err(RestoreError::Storage(format!(
                    "increment chain of {} loops at {}",
                    backup_name, backup.name
                )));
            }
            let sentinel = backup.fetch_sentinel()?;
            next = sentinel
                .increment_from
                .as_ref()
                .map(|from| Backup::new(Arc::clone(&self.base_folder), from.clone()));
            chain.push((backup, sentinel));
        }

        chain.reverse();
        Ok(chain)
    }

    /// Stream every partition of `backup` through clones of `interpreter`.
    /// Stops the remaining partitions on the first error.
    async fn restore_pass(&self, interpreter: &TarInterpreter, backup: &Backup) -> Result<()> {
        let partitions = backup.tar_partitions()?;
        info!(
            "Restoring backup {}: {} partitions, parallelism {}",
            backup.name,
            partitions.len(),
            self.options.parallelism
        );

        let semaphore = Arc::new(Semaphore::new(self.options.parallelism));
        let cancel = self.cancel_token.child_token();
        let mut tasks = JoinSet::new();

        for partition in partitions {
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let backup = backup.clone();
            let interpreter = interpreter.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = sem.acquire_owned() => permit
                        .map_err(|e| RestoreError::Task(format!("semaphore closed: {e}")))?,
                    _ = cancel.cancelled() => return Err(RestoreError::Cancelled),
                };

                let name = partition.clone();
                let count = tokio::task::spawn_blocking(move || {
                    let reader = backup.open_partition(&partition)?;
                    interpret_tar(reader, &interpreter, &cancel)
                })
                .await
                .map_err(|e| RestoreError::Task(format!("partition {name} worker failed: {e}")))??;

                Ok((name, count))
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| RestoreError::Task(e.to_string()))
                .and_then(|r| r);

            match result {
                Ok((name, count)) => debug!("Partition {} done: {} entries", name, count),
                Err(err) if err.is_fatal() => {
                    error!("Fatal error restoring {}: {}", backup.name, err);
                    cancel.cancel();
                    return Err(err);
                }
                Err(RestoreError::Cancelled) if first_error.is_some() => {}
                Err(err) => {
                    error!("Restore of {} failed: {}", backup.name, err);
                    cancel.cancel();
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
