use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A stage of the backup pipeline that can produce a [`StepResult`](crate::backup::process::StepResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dump,
    Archive,
    Upload,
    Cleanup,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Dump => "dump",
            Step::Archive => "archive",
            Step::Upload => "upload",
            Step::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{step} tool failed (exit code: {}): {captured_output}", .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExternalTool {
        step: Step,
        exit_code: Option<i32>,
        captured_output: String,
    },

    #[error("Upload failed: {cause}")]
    Upload { cause: String },

    #[error("Cleanup of {} failed: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl BackupError {
    /// Fatal errors abort the remaining pipeline and make the process exit non-zero.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Config(_) | BackupError::ExternalTool { .. } | BackupError::Upload { .. }
        )
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        BackupError::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
