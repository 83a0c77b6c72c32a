//! External tool invocation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use keelson_common::{Error, Result};

/// Lines of stderr kept for the error message of a failed tool
const STDERR_TAIL_LINES: usize = 20;

/// One configured tool step: a program with its arguments and environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolStep {
    /// Program to execute, resolved through `PATH`
    pub program: String,
    /// Arguments passed verbatim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for this step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ToolStep {
    /// Step running `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// A fully resolved tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Environment added on top of the inherited one
    pub env: BTreeMap<String, String>,
    /// Working directory of the process
    pub workdir: PathBuf,
}

impl Invocation {
    /// Resolve a configured step in `workdir`
    pub fn from_step(step: &ToolStep, workdir: &Path) -> Self {
        Self {
            program: step.program.clone(),
            args: step.args.clone(),
            env: step.env.clone(),
            workdir: workdir.to_path_buf(),
        }
    }

    /// Set an environment variable unless the step already sets it
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    /// Program and arguments joined for logging
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs external tools on behalf of phases
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion; a cancelled token stops the invocation
    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<()>;
}

/// Runs tools as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a process runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<()> {
        let program = invocation.program.as_str();
        if cancel.is_cancelled() {
            return Err(Error::tool(program, "stopped before start"));
        }

        info!(
            command = %invocation.command_line(),
            workdir = %invocation.workdir.display(),
            "running tool"
        );
        let mut child = Command::new(program)
            .args(&invocation.args)
            .envs(&invocation.env)
            .current_dir(&invocation.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool(program, format!("failed to start: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, program.to_string())));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(collect_tail(err)));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                warn!(program = %program, "stopping tool");
                if let Err(e) = child.kill().await {
                    warn!(program = %program, error = %e, "failed to kill tool process");
                }
                return Err(Error::tool(program, "stopped"));
            }
        };

        join_output(stdout, program, "stdout").await;
        let tail = join_output(stderr, program, "stderr").await;

        if status.success() {
            debug!(program = %program, "tool finished");
            Ok(())
        } else {
            Err(Error::tool_exit(program, status.code(), &tail))
        }
    }
}

/// Wait for an output reader task; a failed task yields the default
async fn join_output<T: Default>(handle: Option<JoinHandle<T>>, program: &str, stream: &str) -> T {
    let Some(handle) = handle else {
        return T::default();
    };
    match handle.await {
        Ok(output) => output,
        Err(e) => {
            warn!(program = %program, stream = %stream, error = %e, "output reader failed");
            T::default()
        }
    }
}

async fn forward_lines(reader: impl AsyncRead + Unpin, program: String) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(program = %program, "{}", line);
    }
}

async fn collect_tail(reader: impl AsyncRead + Unpin) -> String {
    let mut tail: Vec<String> = Vec::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("{}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail.join("\n")
}
