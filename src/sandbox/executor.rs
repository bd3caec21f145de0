use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Names where commands run: a container name for [`DockerExecutor`], a
/// directory for [`LocalExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxTarget(String);

impl SandboxTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captured outcome of one command.
///
/// `exit_code == -1` means the command never ran to completion (spawn error,
/// missing sandbox, timeout), as opposed to a non-zero exit of the command.
/// Serialized with the `returncode` key used on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    #[serde(rename = "returncode")]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn execution_failure(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_code: -1,
            stdout: String::new(),
            stderr: error.into(),
        }
    }

    pub fn is_execution_failure(&self) -> bool {
        self.exit_code == -1
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands inside a sandbox. Never fails: problems are data.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, sandbox: &SandboxTarget, command: &str) -> CommandResult;
}

/// Executes through `docker exec -w <working_dir> <container> bash -c <command>`.
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    docker_binary: String,
    working_dir: String,
    timeout: Duration,
}

impl DockerExecutor {
    pub fn new(working_dir: impl Into<String>, timeout: Duration) -> Self {
        Self {
            docker_binary: "docker".to_string(),
            working_dir: working_dir.into(),
            timeout,
        }
    }

    /// Use a different docker-compatible CLI (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.docker_binary = binary.into();
        self
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }
}

#[async_trait]
impl CommandExecutor for DockerExecutor {
    async fn execute(&self, sandbox: &SandboxTarget, command: &str) -> CommandResult {
        let mut cmd = Command::new(&self.docker_binary);
        cmd.args([
            "exec",
            "-w",
            &self.working_dir,
            sandbox.as_str(),
            "bash",
            "-c",
            command,
        ]);
        tracing::debug!(container = %sandbox, command = %command, "docker exec");
        run_captured(cmd, command, self.timeout).await
    }
}

/// Executes `bash -c <command>` on the host with the target as working directory.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: PathBuf,
    timeout: Duration,
}

impl LocalExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: PathBuf::from("bash"),
            timeout,
        }
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn execute(&self, sandbox: &SandboxTarget, command: &str) -> CommandResult {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command).current_dir(sandbox.as_str());
        tracing::debug!(dir = %sandbox, command = %command, "local exec");
        run_captured(cmd, command, self.timeout).await
    }
}

async fn run_captured(mut cmd: Command, command: &str, timeout: Duration) -> CommandResult {
    let started = Instant::now();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let result = tokio::time::timeout(timeout, cmd.output()).await;

    let outcome = match result {
        Ok(Ok(output)) => CommandResult {
            command: command.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
        },
        Ok(Err(e)) => CommandResult::execution_failure(command, format!("Execution error: {}", e)),
        Err(_) => CommandResult::execution_failure(
            command,
            format!("Command timed out after {:.1}s", timeout.as_secs_f64()),
        ),
    };

    tracing::debug!(
        exit_code = outcome.exit_code,
        elapsed_ms = started.elapsed().as_millis() as u64,
        stdout_len = outcome.stdout.len(),
        stderr = %super::truncate(&outcome.stderr, 200),
        "Command finished"
    );
    outcome
}
