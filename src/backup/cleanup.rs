// databasebackup/src/backup/cleanup.rs
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

use super::naming::archive_path_for;
use super::process::StepResult;
use crate::errors::{BackupError, Result, Step};

#[async_trait]
pub trait CleanupExecutor: Send + Sync {
    /// Removes `{archive_base}.tar.gz` and the whole `output_dir`.
    async fn cleanup(&self, archive_base: &Path, output_dir: &Path) -> Result<StepResult>;
}

/// Removes local artifacts. Paths that are already gone are not an error.
#[derive(Debug, Default)]
pub struct LocalCleanup;

#[async_trait]
impl CleanupExecutor for LocalCleanup {
    async fn cleanup(&self, archive_base: &Path, output_dir: &Path) -> Result<StepResult> {
        let archive = archive_path_for(archive_base);

        // Both removals are attempted; the first failure is reported.
        info!(archive = %archive.display(), "clean up archive");
        let archive_result = match tokio::fs::remove_file(&archive).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(BackupError::Cleanup { path: archive, source: e }),
            _ => Ok(()),
        };

        info!(output_dir = %output_dir.display(), "cleaning up backup directory");
        let dir_result = match tokio::fs::remove_dir_all(output_dir).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(BackupError::Cleanup { path: output_dir.to_path_buf(), source: e })
            }
            _ => Ok(()),
        };

        if let (Err(first), Err(second)) = (&archive_result, &dir_result) {
            warn!(error = %second, "output directory also left behind after {}", first);
        }
        archive_result?;
        dir_result?;

        Ok(StepResult::completed(Step::Cleanup))
    }
}
