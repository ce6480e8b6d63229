// databasebackup/src/backup/process.rs
use async_trait::async_trait;
use std::io;
use tokio::process::Command;
use tracing::debug;
use which::which;

use crate::errors::{BackupError, Result, Step};

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec { program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// What a finished process left behind. `exit_code` is `None` when the
/// process was killed by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external programs to completion. Swapped for a fake in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> io::Result<ProcessOutput>;
}

/// Runs programs on the host, resolving them through `PATH`.
#[derive(Debug, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &CommandSpec) -> io::Result<ProcessOutput> {
        let program = which(&command.program).map_err(|e| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} executable not found in PATH: {}", command.program, e),
            )
        })?;
        debug!(program = %program.display(), args = ?command.args, "spawning external tool");

        let output = Command::new(&program)
            .args(&command.args)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Outcome of one pipeline step, consumed by the orchestrator for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub step: Step,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepResult {
    /// A step that ran in-process and has no tool output.
    pub fn completed(step: Step) -> Self {
        StepResult { step, success: true, exit_code: None, stdout: String::new(), stderr: String::new() }
    }

    /// Converts a tool run into a step result, failing on a non-zero exit.
    pub fn from_output(step: Step, output: ProcessOutput) -> Result<Self> {
        if !output.success() {
            return Err(BackupError::ExternalTool {
                step,
                exit_code: output.exit_code,
                captured_output: captured(&output),
            });
        }
        Ok(StepResult {
            step,
            success: true,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// A tool that could not be started at all.
    pub fn spawn_failure(step: Step, program: &str, err: io::Error) -> BackupError {
        BackupError::ExternalTool {
            step,
            exit_code: None,
            captured_output: format!("failed to execute {}: {}", program, err),
        }
    }
}

fn captured(output: &ProcessOutput) -> String {
    match (output.stdout.trim(), output.stderr.trim()) {
        ("", "") => String::new(),
        (out, "") => out.to_string(),
        ("", err) => err.to_string(),
        (out, err) => format!("{}\n{}", out, err),
    }
}
