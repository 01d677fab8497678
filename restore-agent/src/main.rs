//! Restore Agent - Main entry point
//!
//! Restores database data directories from backups in storage.

use anyhow::Result;
use clap::{Parser, Subcommand};
use restore_agent::backup::{list_backups, BASEBACKUPS_PATH};
use restore_agent::daemon::shutdown::ShutdownCoordinator;
use restore_agent::extract::FsyncMode;
use restore_agent::storage::{Folder, LocalFolder};
use restore_agent::{utils, Config, RestoreExecutor, RestoreOptions};
use std::path::PathBuf;
use std::sync::Arc;

/// Exit status when the data directory was left in an unknown state.
const EXIT_FATAL: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore a backup (or LATEST) into a data directory
    Fetch {
        backup_name: String,

        data_directory: PathBuf,

        /// Restore only this backup, not the increment chain below it
        #[arg(long)]
        single_pass: bool,

        /// Restore only these entry names
        #[arg(long, value_name = "NAME", num_args = 1..)]
        restore_only: Vec<String>,

        /// Archive parts restored in parallel (overrides config)
        #[arg(long)]
        parallelism: Option<usize>,

        /// File sync mode: default, global or disabled (overrides config)
        #[arg(long)]
        fsync_mode: Option<FsyncMode>,
    },

    /// List backups in storage, oldest first
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    utils::logger::init(&log_level)?;

    tracing::info!("Starting restore-agent v{}", env!("CARGO_PKG_VERSION"));

    let base_folder: Arc<dyn Folder> =
        Arc::new(LocalFolder::new(config.storage.path.join(BASEBACKUPS_PATH)));

    match args.command {
        Command::Fetch {
            backup_name,
            data_directory,
            single_pass,
            restore_only,
            parallelism,
            fsync_mode,
        } => {
            if let Some(parallelism) = parallelism {
                config.restore.parallelism = parallelism;
            }
            if !restore_only.is_empty() {
                config.restore.files = Some(restore_only);
            }
            if fsync_mode.is_some() {
                config.restore.fsync_mode = fsync_mode;
            }
            config.validate()?;

            let shutdown = ShutdownCoordinator::new();
            let listener = shutdown.spawn_signal_listener();
            let executor = RestoreExecutor::new(
                base_folder,
                &data_directory,
                RestoreOptions::from_config(&config),
            )
            .with_cancel(shutdown.token());

            let result = if single_pass {
                executor.restore_single(&backup_name).await
            } else {
                executor.restore_chain(&backup_name).await
            };
            listener.abort();

            match result {
                Ok(result) => {
                    tracing::info!(
                        "Restored {} into {} ({} entries)",
                        result.backups.join(" -> "),
                        data_directory.display(),
                        result.summary.total()
                    );
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!("{}; data directory state is unknown, aborting", err);
                    std::process::exit(EXIT_FATAL);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::List => {
            for (name, sentinel) in list_backups(base_folder.as_ref())? {
                let finished = sentinel
                    .finish_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                let kind = match &sentinel.increment_from {
                    Some(from) => format!("increment of {from}"),
                    None => "full".to_string(),
                };
                println!("{name}\t{finished}\t{kind}");
            }
        }
    }

    Ok(())
}
