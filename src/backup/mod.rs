mod logic;
pub(crate) mod archive;
pub(crate) mod cleanup;
pub(crate) mod db_dump;
pub(crate) mod naming;
pub(crate) mod notify;
pub(crate) mod process;
pub(crate) mod s3_upload;

use std::sync::Arc;

use crate::config::{ArchiveBackend, BackupSettings, EnvSnapshot};
use crate::errors::Result;
use archive::{ArchiveExecutor, NativeArchiver, TarCommandArchiver};
use cleanup::LocalCleanup;
use db_dump::MongoDumpExecutor;
use naming::SystemClock;
use notify::HttpNotifier;
use process::{ProcessRunner, TokioProcessRunner};
use s3_upload::S3Uploader;

pub use logic::{BackupOrchestrator, Executors, RunReport};

/// Public entry point for the backup process: wires the production
/// executors and runs the pipeline once.
pub async fn run_backup_flow(settings: &BackupSettings, env: &EnvSnapshot) -> Result<RunReport> {
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let archiver: Box<dyn ArchiveExecutor> = match settings.archiver {
        ArchiveBackend::Tar => Box::new(TarCommandArchiver::new(runner.clone())),
        ArchiveBackend::Native => Box::new(NativeArchiver),
    };

    let executors = Executors {
        dumper: Box::new(MongoDumpExecutor::new(runner, settings.dump_tool.clone())),
        archiver,
        uploader: Box::new(S3Uploader::new(settings.folder_prefix.clone())),
        cleaner: Box::new(LocalCleanup),
        notifier: Box::new(HttpNotifier::new(settings.notify.clone())),
    };

    BackupOrchestrator::new(settings, env, &SystemClock, executors).run().await
}
