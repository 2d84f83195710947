//! CLI pipeline execution.
//!
//! A pipeline is a short sequence of provisioner CLI invocations run in
//! a workspace directory. Synchronous execution blocks the caller with a
//! deadline (used for `init`); asynchronous execution registers the
//! handle, runs the stages in a background task, records the outcome in
//! `pipeline.store`, and signals completion in-process.

pub mod output;
pub mod process;
pub mod registry;
pub mod store;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::workspace::lock::OperationKind;
use crate::workspace::Workspace;
use crate::Result;

use registry::{CompletionGuard, PipelineRegistry};
use store::{StageRecord, StoreRecord};

/// Result of a single CLI invocation.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl CommandOutput {
    pub fn error_message(&self) -> String {
        output::error_message(self.exit_code, &self.stdout_lines, &self.stderr_lines)
    }
}

/// One stage of a pipeline: an argv plus the exit codes that count as
/// success (`plan -detailed-exitcode` reports a diff as 2).
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub args: Vec<String>,
    pub success_codes: Vec<i32>,
}

impl StageSpec {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            success_codes: vec![0],
        }
    }

    pub fn with_success_codes(mut self, codes: &[i32]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    fn accepts(&self, exit_code: i32) -> bool {
        self.success_codes.contains(&exit_code)
    }
}

/// Run a single invocation synchronously, killing the child if the
/// deadline fires first.
pub async fn run(
    binary: &str,
    dir: &Path,
    args: &[&str],
    operation: OperationKind,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let (child, stdout_task, stderr_task) = spawn_child(binary, dir, &owned)?;
    collect(child, stdout_task, stderr_task, operation, timeout).await
}

/// Start an asynchronous pipeline for the workspace.
///
/// Registration fails with `OperationInProgress` if the handle already
/// has a live pipeline in this process; the on-disk state-lock guards
/// against other processes.
pub fn spawn(
    ws: Workspace,
    registry: Arc<PipelineRegistry>,
    binary: String,
    operation: OperationKind,
    stages: Vec<StageSpec>,
) -> Result<()> {
    let guard = registry
        .begin(ws.handle(), operation)
        .map_err(Error::OperationInProgress)?;
    info!(
        handle = %ws.handle(),
        operation = %operation,
        stages = stages.len(),
        "spawning pipeline"
    );
    tokio::spawn(run_pipeline(ws, binary, operation, stages, guard));
    Ok(())
}

async fn run_pipeline(
    ws: Workspace,
    binary: String,
    operation: OperationKind,
    stages: Vec<StageSpec>,
    guard: CompletionGuard,
) {
    let mut records = Vec::new();
    let mut succeeded = true;

    for stage in &stages {
        let (child, stdout_task, stderr_task) = match spawn_child(&binary, ws.path(), &stage.args) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(handle = %ws.handle(), error = %e, "failed to spawn pipeline stage");
                records.push(StageRecord {
                    args: stage.args.clone(),
                    exit_code: 127,
                    stdout_lines: vec![],
                    stderr_lines: vec![e.to_string()],
                });
                succeeded = false;
                break;
            }
        };

        if let Some(pid) = child.id() {
            // Recorded so a restarted process can probe the child.
            if let Err(e) = ws.set_lock_pid(pid) {
                warn!(handle = %ws.handle(), error = %e, "failed to record pipeline pid");
            }
        }

        match collect(child, stdout_task, stderr_task, operation, None).await {
            Ok(out) => {
                let ok = stage.accepts(out.exit_code);
                records.push(StageRecord {
                    args: stage.args.clone(),
                    exit_code: out.exit_code,
                    stdout_lines: out.stdout_lines,
                    stderr_lines: out.stderr_lines,
                });
                if !ok {
                    succeeded = false;
                    break;
                }
            }
            Err(e) => {
                warn!(handle = %ws.handle(), error = %e, "pipeline stage failed");
                records.push(StageRecord {
                    args: stage.args.clone(),
                    exit_code: -1,
                    stdout_lines: vec![],
                    stderr_lines: vec![e.to_string()],
                });
                succeeded = false;
                break;
            }
        }
    }

    let record = StoreRecord {
        operation,
        succeeded,
        stages: records,
        finished_at: Utc::now(),
    };
    if let Err(e) = record.write(&ws.store_path()) {
        // The workspace may have been torn down by Close while we ran.
        warn!(handle = %ws.handle(), error = %e, "failed to write pipeline store");
    }
    info!(
        handle = %ws.handle(),
        operation = %operation,
        succeeded,
        "pipeline finished"
    );
    drop(guard);
}

type LineTask = JoinHandle<Vec<String>>;

fn spawn_child(binary: &str, dir: &Path, args: &[String]) -> Result<(Child, LineTask, LineTask)> {
    debug!(binary, ?args, dir = %dir.display(), "running provisioner CLI");

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(dir)
        .env("TF_IN_AUTOMATION", "1")
        .env("TF_INPUT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| Error::Io {
        path: format!("{} in {}", binary, dir.display()),
        source: e,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stdout) = stdout {
            let mut stream = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = stream.next_line().await {
                debug!(stream = "stdout", "{}", line);
                lines.push(line);
            }
        }
        lines
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stderr) = stderr {
            let mut stream = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = stream.next_line().await {
                debug!(stream = "stderr", "{}", line);
                lines.push(line);
            }
        }
        lines
    });

    Ok((child, stdout_task, stderr_task))
}

async fn collect(
    mut child: Child,
    stdout_task: LineTask,
    stderr_task: LineTask,
    operation: OperationKind,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Timeout { operation });
            }
        },
        None => child.wait().await,
    };

    let status = status.map_err(|e| Error::Io {
        path: "provisioner child".to_string(),
        source: e,
    })?;

    let stdout_lines = stdout_task.await.unwrap_or_default();
    let stderr_lines = stderr_task.await.unwrap_or_default();
    let exit_code = status.code().unwrap_or(-1);

    debug!(exit_code, "provisioner CLI exited");

    Ok(CommandOutput {
        exit_code,
        stdout_lines,
        stderr_lines,
    })
}
