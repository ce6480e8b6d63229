// databasebackup/src/backup/archive.rs
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::Builder;
use tracing::info;
use walkdir::WalkDir;

use super::naming::archive_path_for;
use super::process::{CommandSpec, ProcessRunner, StepResult};
use crate::errors::{BackupError, Result, Step};

#[async_trait]
pub trait ArchiveExecutor: Send + Sync {
    /// Compresses `source_dir` into `{archive_base}.tar.gz`, overwriting any
    /// existing file of that name.
    async fn archive(&self, source_dir: &Path, archive_base: &Path) -> Result<StepResult>;
}

/// Splits `source_dir` into the directory tar changes into and the entry name,
/// so the archive holds `orders_2024_.../...` instead of absolute paths.
fn split_source(source_dir: &Path) -> Option<(PathBuf, PathBuf)> {
    let name = source_dir.file_name()?;
    let parent = match source_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((parent, PathBuf::from(name)))
}

fn tool_failure(err: anyhow::Error) -> BackupError {
    BackupError::ExternalTool { step: Step::Archive, exit_code: None, captured_output: format!("{:#}", err) }
}

/// Shells out to `tar -zcvf`.
pub struct TarCommandArchiver {
    runner: Arc<dyn ProcessRunner>,
}

impl TarCommandArchiver {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        TarCommandArchiver { runner }
    }
}

#[async_trait]
impl ArchiveExecutor for TarCommandArchiver {
    async fn archive(&self, source_dir: &Path, archive_base: &Path) -> Result<StepResult> {
        let archive_path = archive_path_for(archive_base);
        let (parent, name) = split_source(source_dir)
            .ok_or_else(|| tool_failure(anyhow!("cannot archive {}", source_dir.display())))?;

        info!(source = %source_dir.display(), archive = %archive_path.display(), "compressing backup");
        let command = CommandSpec::new("tar")
            .arg("-zcvf")
            .arg(archive_path.display().to_string())
            .arg("-C")
            .arg(parent.display().to_string())
            .arg(name.display().to_string());

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| StepResult::spawn_failure(Step::Archive, "tar", e))?;
        StepResult::from_output(Step::Archive, output)
    }
}

/// Builds the archive in-process with `tar` and `flate2`.
#[derive(Debug, Default)]
pub struct NativeArchiver;

#[async_trait]
impl ArchiveExecutor for NativeArchiver {
    async fn archive(&self, source_dir: &Path, archive_base: &Path) -> Result<StepResult> {
        let source_dir = source_dir.to_path_buf();
        let archive_path = archive_path_for(archive_base);
        info!(source = %source_dir.display(), archive = %archive_path.display(), "compressing backup in-process");

        let entries = tokio::task::spawn_blocking(move || create_tar_gz_archive(&source_dir, &archive_path))
            .await
            .map_err(|e| tool_failure(anyhow!("archive task panicked: {}", e)))?
            .map_err(tool_failure)?;

        Ok(StepResult { stdout: format!("{} entries archived", entries), ..StepResult::completed(Step::Archive) })
    }
}

/// Creates a GZipped TAR archive of `source_dir`. Entries are stored under the
/// directory's own name. Returns the number of entries written.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> anyhow::Result<usize> {
    if !source_dir.is_dir() {
        return Err(anyhow!("Source for archival is not a directory: {}", source_dir.display()));
    }
    let (_, root_name) = split_source(source_dir)
        .with_context(|| format!("Cannot derive an archive root from {}", source_dir.display()))?;

    if let Some(parent) = archive_dest_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory for archive: {}", parent.display())
            })?;
        }
    }

    let archive_file = File::create(archive_dest_path)
        .with_context(|| format!("Failed to create archive file: {}", archive_dest_path.display()))?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);
    let mut entries = 0;

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        let path = entry.path();
        let relative = path.strip_prefix(source_dir).with_context(|| {
            format!("Failed to strip prefix {} from {}", source_dir.display(), path.display())
        })?;
        let name = root_name.join(relative);

        if entry.file_type().is_dir() {
            tar_builder
                .append_dir(&name, path)
                .with_context(|| format!("Failed to append directory {} to archive", path.display()))?;
        } else if entry.file_type().is_file() {
            tar_builder.append_path_with_name(path, &name).with_context(|| {
                format!("Failed to append file {} as {} to archive", path.display(), name.display())
            })?;
        } else {
            continue;
        }
        entries += 1;
    }

    let encoder = tar_builder.into_inner().with_context(|| {
        format!("Failed to finish tar stream for archive: {}", archive_dest_path.display())
    })?;
    encoder
        .finish()
        .with_context(|| format!("Failed to finish Gzip encoding for archive: {}", archive_dest_path.display()))?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::process::fake::FakeRunner;
    use flate2::read::GzDecoder;
    use std::fs;

    fn entry_names(archive: &Path) -> anyhow::Result<Vec<String>> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive)?));
        let mut names = Vec::new();
        for entry in archive.entries()? {
            names.push(entry?.path()?.display().to_string().trim_end_matches('/').to_string());
        }
        Ok(names)
    }

    #[tokio::test]
    async fn test_tar_command_changes_into_parent() -> anyhow::Result<()> {
        let runner = FakeRunner::ok();
        let archiver = TarCommandArchiver::new(Arc::new(runner.clone()));
        archiver
            .archive(Path::new("/backups/orders_2024_01_02_030405"), Path::new("/backups/orders_2024_01_02_030405"))
            .await?;

        let calls = runner.calls();
        assert_eq!(calls[0].program, "tar");
        assert_eq!(
            calls[0].args,
            vec!["-zcvf", "/backups/orders_2024_01_02_030405.tar.gz", "-C", "/backups", "orders_2024_01_02_030405"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_tar_failure_is_external_tool_error() {
        let archiver = TarCommandArchiver::new(Arc::new(FakeRunner::exiting_with(2, "No space left on device")));
        let err = archiver.archive(Path::new("./d"), Path::new("./d")).await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalTool { step: Step::Archive, exit_code: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_native_archive_contains_dump_tree() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("orders_2024_01_02_030405");
        fs::create_dir_all(source.join("orders"))?;
        fs::write(source.join("orders/items.bson"), b"bson-bytes")?;
        fs::write(source.join("orders/items.metadata.json"), b"{}")?;

        let result = NativeArchiver.archive(&source, &source).await?;
        assert!(result.success);

        let archive = dir.path().join("orders_2024_01_02_030405.tar.gz");
        let names = entry_names(&archive)?;
        assert!(names.contains(&"orders_2024_01_02_030405/orders/items.bson".to_string()));
        assert!(names.contains(&"orders_2024_01_02_030405/orders/items.metadata.json".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_native_archive_missing_source_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("missing");
        let err = NativeArchiver.archive(&source, &source).await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalTool { step: Step::Archive, exit_code: None, .. }));
        assert!(!archive_path_for(&source).exists());
        Ok(())
    }
}
