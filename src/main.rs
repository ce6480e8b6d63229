//! MongoDB backup job
//!
//! Dumps one database, archives the dump, uploads the archive to object
//! storage, removes the local artifacts and, on clusters, notifies admins.

// databasebackup/src/main.rs
mod backup;
mod config;
mod errors;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{BackupSettings, Cli, EnvSnapshot};
use errors::BackupError;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenv::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env file: {}", e);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    match run_app(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(BackupError::Config(_)) = e.downcast_ref::<BackupError>() {
                let _ = Cli::command().print_help();
            }
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let settings = BackupSettings::resolve(cli)
        .map_err(|e| BackupError::Config(format!("{:#}", e)))
        .context("Failed to load backup configuration")?;
    let env = EnvSnapshot::capture();

    let report = backup::run_backup_flow(&settings, &env).await.context("Backup process failed")?;

    if let Some(cleanup_error) = &report.cleanup_error {
        warn!(cleanup_failed = true, "backup uploaded but local cleanup failed: {}", cleanup_error);
    }
    info!(
        state = %report.state,
        remote_key = %report.context.names.remote_key,
        archive = ?report.context.archive_path,
        notified = report.notified,
        "operation completed successfully"
    );
    Ok(())
}
