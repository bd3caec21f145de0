//! One terminal trial: sandbox, tool server, solver exchange, verification.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::catalog::{SandboxSource, TerminalTask};
use crate::a2a::A2aClient;
use crate::metrics::MetricsCollector;
use crate::sandbox::{CommandExecutor, PortAllocator, SandboxContainer, SandboxTarget};
use crate::tool_server::{ToolServer, ToolServerOptions};

/// Why a trial failed before verification could judge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    None,
    UnknownAgentError,
    ToolServerStartupFailed,
    SandboxSetupFailed,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::None => "none",
            FailureMode::UnknownAgentError => "unknown_agent_error",
            FailureMode::ToolServerStartupFailed => "tool_server_startup_failed",
            FailureMode::SandboxSetupFailed => "sandbox_setup_failed",
        }
    }
}

/// Outcome of one attempt at one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub task_id: String,
    pub attempt: usize,
    pub resolved: bool,
    pub failure_mode: FailureMode,
    pub difficulty: Option<String>,
    pub tool_server_port: Option<u16>,
    pub verify_exit_code: Option<i32>,
    /// Solver reply, truncated.
    pub response: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl TrialResult {
    fn new(task: &TerminalTask, attempt: usize) -> Self {
        Self {
            task_id: task.id.clone(),
            attempt,
            resolved: false,
            failure_mode: FailureMode::None,
            difficulty: task.difficulty.clone(),
            tool_server_port: None,
            verify_exit_code: None,
            response: String::new(),
            error: None,
            started_at: Utc::now(),
            duration_secs: 0.0,
        }
    }

    fn failed(mut self, mode: FailureMode, error: impl Into<String>) -> Self {
        self.failure_mode = mode;
        self.error = Some(error.into());
        self
    }
}

/// Instruction sent to the solver for a sandbox task.
pub fn format_task_message(instruction: &str, tool_server_url: &str, working_dir: &str) -> String {
    format!(
        "You are being evaluated on Terminal-Bench.

TASK: {instruction}

Tool Server URL: {tool_server_url}

ENVIRONMENT:
- Tool: execute_bash_command (parameter: command)
- Working Dir: {working_dir} (inside Docker container)

Connect to the tool server, execute bash commands to complete the task."
    )
}

/// Failure mode implied by the solver's reply text.
pub fn classify_response(response: &str) -> FailureMode {
    if response.contains("Error:") {
        FailureMode::UnknownAgentError
    } else {
        FailureMode::None
    }
}

/// Runs single trials. Shared by all concurrent trials of an evaluation.
pub struct TerminalTaskRunner {
    executor: Arc<dyn CommandExecutor>,
    ports: Arc<PortAllocator>,
    client: A2aClient,
    tool_options: ToolServerOptions,
    output_dir: PathBuf,
    cleanup: bool,
    container_lifetime_secs: u64,
    metrics: MetricsCollector,
}

impl TerminalTaskRunner {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        ports: Arc<PortAllocator>,
        client: A2aClient,
        tool_options: ToolServerOptions,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let container_lifetime_secs = client.message_timeout().as_secs().saturating_mul(2).max(600);
        Self {
            executor,
            ports,
            client,
            tool_options,
            output_dir: output_dir.into(),
            cleanup: true,
            container_lifetime_secs,
            metrics: MetricsCollector::new(),
        }
    }

    /// Keep containers the harness started (for post-mortem debugging).
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Runs one attempt. Never fails: every error is recorded in the result.
    pub async fn run_task(&self, task: &TerminalTask, attempt: usize, solver_url: &str) -> TrialResult {
        let started = Instant::now();
        let mut result = TrialResult::new(task, attempt);

        let mut container = None;
        let target = match task.sandbox_source() {
            Ok(SandboxSource::Existing(name)) => SandboxTarget::new(name),
            Ok(SandboxSource::Image(image)) => {
                let name = format!("arena-{}-{}-{}", task.id, attempt, &crate::a2a::types::new_id()[..8]);
                match SandboxContainer::start(
                    image,
                    &name,
                    &self.tool_options.working_dir,
                    self.container_lifetime_secs,
                )
                .await
                {
                    Ok(sandbox) => {
                        let target = sandbox.target();
                        container = Some(sandbox);
                        target
                    }
                    Err(e) => {
                        tracing::error!(task_id = %task.id, error = %e, "Sandbox setup failed");
                        return self.finish(result.failed(FailureMode::SandboxSetupFailed, e.to_string()), started);
                    }
                }
            }
            Err(e) => {
                return self.finish(result.failed(FailureMode::SandboxSetupFailed, e.to_string()), started);
            }
        };

        result = self.run_in_sandbox(task, &target, solver_url, result).await;

        if let Some(mut container) = container {
            if self.cleanup {
                container.destroy().await;
            } else {
                let name = container.detach();
                tracing::info!(container = %name, "Keeping container");
            }
        }

        self.finish(result, started)
    }

    async fn run_in_sandbox(
        &self,
        task: &TerminalTask,
        target: &SandboxTarget,
        solver_url: &str,
        mut result: TrialResult,
    ) -> TrialResult {
        let lease = self.ports.lease(format!("{}#{}", task.id, result.attempt));
        result.tool_server_port = Some(lease.port);
        tracing::info!(task_id = %task.id, container = %target, port = lease.port, "Starting trial");

        let mut server = ToolServer::new(
            lease,
            target.clone(),
            self.executor.clone(),
            self.tool_options.clone(),
        );
        server.start();

        if let Err(e) = server.wait_until_ready().await {
            tracing::error!(task_id = %task.id, error = %e, "Tool server did not become ready");
            server.shutdown().await;
            return result.failed(FailureMode::ToolServerStartupFailed, e.to_string());
        }

        let url = server.url();
        let message = format_task_message(&task.instruction, &url, &self.tool_options.working_dir);
        tracing::info!(task_id = %task.id, solver = %solver_url, "Sending task to solver");
        let response = self.client.send_text(solver_url, &message).await;

        if let Err(e) = self.log_interaction(&task.id, result.attempt, &url, target, &message, &response).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to write interaction log");
        }

        result.failure_mode = classify_response(&response);
        result.response = crate::sandbox::truncate(&response, 4000);

        result.resolved = match &task.verify {
            Some(command) => {
                let check = server.execute_command(command).await;
                result.verify_exit_code = Some(check.exit_code);
                tracing::info!(task_id = %task.id, exit_code = check.exit_code, "Verification finished");
                check.succeeded() && result.failure_mode == FailureMode::None
            }
            None => result.failure_mode == FailureMode::None,
        };

        server.shutdown().await;
        result
    }

    async fn log_interaction(
        &self,
        task_id: &str,
        attempt: usize,
        url: &str,
        target: &SandboxTarget,
        message: &str,
        response: &str,
    ) -> std::io::Result<()> {
        let path = interaction_log_path(&self.output_dir, task_id, attempt);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let heavy = "=".repeat(80);
        let light = "-".repeat(80);
        let entry = format!(
            "\n{heavy}\nTool Server: {url} | Container: {target}\nINSTRUCTION:\n{message}\n{light}\nRESPONSE:\n{response}\n{heavy}\n"
        );
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }

    fn finish(&self, mut result: TrialResult, started: Instant) -> TrialResult {
        result.duration_secs = started.elapsed().as_secs_f64();
        self.metrics
            .record_task(if result.resolved { "resolved" } else { "unresolved" });
        tracing::info!(
            task_id = %result.task_id,
            attempt = result.attempt,
            resolved = result.resolved,
            failure_mode = result.failure_mode.as_str(),
            duration_secs = result.duration_secs,
            "Trial finished"
        );
        result
    }
}

/// `<output>/<task_id>/attempt-<n>/agent_interaction.log`; one file per
/// attempt so concurrent attempts never share a log.
pub fn interaction_log_path(output_dir: &Path, task_id: &str, attempt: usize) -> PathBuf {
    output_dir
        .join(task_id)
        .join(format!("attempt-{}", attempt))
        .join("agent_interaction.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_message_layout() {
        let message = format_task_message("List files", "http://localhost:10000", "/app");
        assert!(message.starts_with("You are being evaluated on Terminal-Bench.\n\nTASK: List files\n"));
        assert!(message.contains("\nTool Server URL: http://localhost:10000\n"));
        assert!(message.contains("- Tool: execute_bash_command (parameter: command)\n"));
        assert!(message.contains("- Working Dir: /app (inside Docker container)\n"));
        assert!(message.ends_with("execute bash commands to complete the task."));
        assert_eq!(
            crate::solver::extract_tool_server_url(&message).as_deref(),
            Some("http://localhost:10000")
        );
    }

    #[test]
    fn test_interaction_logs_are_per_attempt() {
        let output = Path::new("/results");
        let first = interaction_log_path(output, "hello", 0);
        let second = interaction_log_path(output, "hello", 1);
        assert_eq!(first, Path::new("/results/hello/attempt-0/agent_interaction.log"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(classify_response("All done."), FailureMode::None);
        assert_eq!(
            classify_response("Error: Tool Server URL not found"),
            FailureMode::UnknownAgentError
        );
        assert_eq!(FailureMode::UnknownAgentError.as_str(), "unknown_agent_error");
    }
}
