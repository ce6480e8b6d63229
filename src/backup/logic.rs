// databasebackup/src/backup/logic.rs
use chrono::NaiveDateTime;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::archive::ArchiveExecutor;
use super::cleanup::CleanupExecutor;
use super::db_dump::DumpExecutor;
use super::naming::{BackupNames, Clock, NamingPolicy};
use super::notify::{NotificationExecutor, RunSummary};
use super::process::StepResult;
use super::s3_upload::UploadExecutor;
use crate::config::connection::ConnectionTarget;
use crate::config::credentials;
use crate::config::{BackupSettings, EnvSnapshot, ExecutionMode};
use crate::errors::{BackupError, Result};

/// Where a run currently is. `Failed` is only reachable from the fatal steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Configured,
    Dumping,
    Archiving,
    Uploading,
    CleaningUp,
    Notifying,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State owned by a single run. Names are derived once from the timestamp
/// captured at start; the archive path is only set once the archive exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub started_at: NaiveDateTime,
    pub mode: ExecutionMode,
    pub database: String,
    pub names: BackupNames,
    pub archive_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RunReport {
    pub state: PipelineState,
    pub context: RunContext,
    pub cleanup_error: Option<BackupError>,
    pub notified: bool,
}

/// The collaborators a run drives, in pipeline order.
pub struct Executors {
    pub dumper: Box<dyn DumpExecutor>,
    pub archiver: Box<dyn ArchiveExecutor>,
    pub uploader: Box<dyn UploadExecutor>,
    pub cleaner: Box<dyn CleanupExecutor>,
    pub notifier: Box<dyn NotificationExecutor>,
}

pub struct BackupOrchestrator<'a> {
    settings: &'a BackupSettings,
    env: &'a EnvSnapshot,
    clock: &'a dyn Clock,
    executors: Executors,
    state: PipelineState,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(settings: &'a BackupSettings, env: &'a EnvSnapshot, clock: &'a dyn Clock, executors: Executors) -> Self {
        BackupOrchestrator { settings, env, clock, executors, state: PipelineState::Init }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "pipeline state transition");
        self.state = next;
    }

    /// Marks the run failed and logs what the failing step captured.
    fn fail(&mut self, err: BackupError) -> BackupError {
        match &err {
            BackupError::ExternalTool { step, exit_code, captured_output } => {
                error!(%step, exit_code = ?exit_code, "error processing command");
                error!(%step, "output from error: {}", captured_output);
            }
            other => error!(state = %self.state, error = %other, "backup step failed"),
        }
        self.advance(PipelineState::Failed);
        err
    }

    fn log_step(result: &StepResult) {
        debug!(step = %result.step, success = result.success, exit_code = ?result.exit_code, "step finished");
        if !result.stdout.trim().is_empty() {
            debug!(step = %result.step, "{}", result.stdout.trim());
        }
        if !result.stderr.trim().is_empty() {
            debug!(step = %result.step, "{}", result.stderr.trim());
        }
    }

    /// Runs dump → archive → upload → cleanup → notify.
    ///
    /// Configuration problems and dump/archive/upload failures are returned as
    /// errors and stop the run. Cleanup and notification failures are logged
    /// and recorded in the report only.
    pub async fn run(mut self) -> Result<RunReport> {
        // Init
        let target = ConnectionTarget::parse(&self.settings.mongo_url)?;
        let bucket = self
            .settings
            .bucket_name
            .clone()
            .ok_or_else(|| BackupError::config("--bucket-name is required"))?;
        self.settings.check_notify_recipients()?;

        let started_at = self.clock.now();
        info!(started_at = %started_at, "starting mongo-backup");
        info!(target = %target.redacted(), "mongo instance provided");

        let names = NamingPolicy::new(&self.settings.output_dir).derive(&target.database, &started_at);
        let mut context = RunContext {
            started_at,
            mode: self.settings.mode,
            database: target.database.clone(),
            names,
            archive_path: None,
        };

        // Configured
        let resolved = credentials::resolve(self.settings.mode, &self.settings.credentials, self.env)?;
        if let Some(secret) = &resolved.materialized {
            let secret_path = std::path::absolute(secret.path()).unwrap_or_else(|_| secret.path().to_path_buf());
            let output_dir =
                std::path::absolute(&context.names.output_dir).unwrap_or_else(|_| context.names.output_dir.clone());
            if secret_path.starts_with(&output_dir) {
                return Err(BackupError::config(format!(
                    "credentials path {} must not be inside the dump directory {}",
                    secret_path.display(),
                    output_dir.display()
                )));
            }
        }
        self.advance(PipelineState::Configured);
        info!(output_dir = %context.names.output_dir.display(), "will save to directory");

        // Dumping
        self.advance(PipelineState::Dumping);
        let step_started = Instant::now();
        match self.executors.dumper.dump(&target, &context.names.output_dir).await {
            Ok(result) => {
                Self::log_step(&result);
                info!(
                    started_at = %context.started_at,
                    elapsed_secs = step_started.elapsed().as_secs(),
                    "backup successful"
                );
            }
            Err(e) => return Err(self.fail(e)),
        }

        // Archiving
        self.advance(PipelineState::Archiving);
        match self
            .executors
            .archiver
            .archive(&context.names.output_dir, &context.names.archive_base)
            .await
        {
            Ok(result) => {
                Self::log_step(&result);
                context.archive_path = Some(context.names.archive_path());
                info!("backup zipped successfully");
            }
            Err(e) => return Err(self.fail(e)),
        }

        // Uploading
        self.advance(PipelineState::Uploading);
        let archive_path = context.names.archive_path();
        if let Err(e) = self
            .executors
            .uploader
            .upload(&resolved.credentials, &bucket, &context.names.remote_key, &archive_path)
            .await
        {
            warn!(
                archive = %archive_path.display(),
                output_dir = %context.names.output_dir.display(),
                "local artifacts left in place for manual recovery"
            );
            return Err(self.fail(e));
        }

        // CleaningUp
        self.advance(PipelineState::CleaningUp);
        let cleanup_error = match self
            .executors
            .cleaner
            .cleanup(&context.names.archive_base, &context.names.output_dir)
            .await
        {
            Ok(_) => {
                info!("successfully cleaned up everything");
                None
            }
            Err(e) => {
                warn!(cleanup_failed = true, error = %e, "cleanup failed, local disk usage will grow");
                Some(e)
            }
        };

        // Notifying
        let mut notified = false;
        if context.mode == ExecutionMode::Managed {
            self.advance(PipelineState::Notifying);
            let summary = RunSummary {
                database: context.database.clone(),
                bucket: bucket.clone(),
                remote_key: context.names.remote_key.clone(),
                started_at: context.started_at,
                finished_at: self.clock.now(),
            };
            match self.executors.notifier.notify_success(&summary).await {
                Ok(()) => notified = true,
                Err(e) => warn!(error = %e, "failed to send success notification"),
            }
        }

        self.advance(PipelineState::Done);
        drop(resolved);
        info!(remote_key = %context.names.remote_key, bucket = %bucket, "backup run finished");
        Ok(RunReport { state: self.state, context, cleanup_error, notified })
    }
}
