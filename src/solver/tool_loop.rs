//! Solver-side tool-calling loop.
//!
//! This module implements the loop that:
//! 1. Fetches the tool catalog once per session
//! 2. Asks the reasoning backend for the next step
//! 3. Executes every requested tool call against the tool server
//! 4. Feeds formatted results back into the transcript
//! 5. Stops on a reply without tool calls or when the budget runs out

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::error::{LlmError, ToolServerError};
use crate::llm::{ChatMessage, ReasoningBackend, ToolCall};
use crate::tool_server::{CallToolResult, ToolDescriptor, ToolInvoker, ToolServerClient};

/// System prompt for the terminal solver.
pub const SOLVER_SYSTEM_PROMPT: &str = "You are a helpful assistant being evaluated on Terminal-Bench.

Your goal is to complete terminal tasks by executing bash commands.

Guidelines:
- Break down complex tasks into simple steps
- Execute one command at a time and check the result
- If a command fails, analyze the error and try a different approach
- When complete, provide a clear summary
- Be concise but thorough";

/// Returned when the backend finishes with empty content.
pub const COMPLETED_TEXT: &str = "Task completed.";

/// Returned when `max_iterations` rounds all requested tools.
pub const ITERATION_LIMIT_TEXT: &str = "Task completed (reached iteration limit).";

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("Reasoning backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool server error: {0}")]
    ToolServer(#[from] ToolServerError),
}

pub struct ToolCallLoop {
    backend: Arc<dyn ReasoningBackend>,
    max_iterations: usize,
    connect_timeout: Duration,
}

impl ToolCallLoop {
    pub fn new(backend: Arc<dyn ReasoningBackend>, max_iterations: usize) -> Self {
        Self {
            backend,
            max_iterations,
            connect_timeout: Duration::from_secs(300),
        }
    }

    /// Per-request timeout for tool server calls. Must cover the longest command.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connects to the tool server at `tool_server_url` and solves `task_text`.
    pub async fn solve(&self, task_text: &str, tool_server_url: &str) -> Result<String, SolveError> {
        let client = ToolServerClient::connect(tool_server_url, self.connect_timeout).await?;
        self.solve_with(&client, task_text).await
    }

    /// Runs the loop against an already connected tool invoker.
    pub async fn solve_with(
        &self,
        tools: &dyn ToolInvoker,
        task_text: &str,
    ) -> Result<String, SolveError> {
        let catalog: Vec<ToolDescriptor> = tools.list_tools().await?;
        tracing::info!(tools = catalog.len(), "Fetched tool catalog");

        let mut transcript = vec![
            ChatMessage::system(SOLVER_SYSTEM_PROMPT),
            ChatMessage::user(task_text),
        ];

        for iteration in 1..=self.max_iterations {
            let turn = self.backend.next_step(&transcript, &catalog).await?;
            tracing::info!(
                iteration,
                max_iterations = self.max_iterations,
                tool_calls = turn.tool_calls.len(),
                content = %crate::sandbox::truncate(turn.content.as_deref().unwrap_or(""), 200),
                "Reasoning step"
            );
            transcript.push(ChatMessage::assistant(&turn));

            if turn.tool_calls.is_empty() {
                return Ok(match turn.content {
                    Some(text) if !text.trim().is_empty() => text,
                    _ => COMPLETED_TEXT.to_string(),
                });
            }

            for call in &turn.tool_calls {
                let result_text = execute_call(tools, call).await?;
                transcript.push(ChatMessage::tool_result(&call.id, result_text));
            }
        }

        tracing::warn!(max_iterations = self.max_iterations, "Iteration limit reached");
        Ok(ITERATION_LIMIT_TEXT.to_string())
    }
}

async fn execute_call(tools: &dyn ToolInvoker, call: &ToolCall) -> Result<String, SolveError> {
    let arguments = match call.parsed_arguments() {
        Ok(arguments) => arguments,
        Err(e) => {
            tracing::warn!(tool = %call.name(), error = %e, "Undecodable tool arguments");
            return Ok(format!("Error: Invalid tool arguments: {}", e));
        }
    };

    tracing::info!(tool = %call.name(), arguments = %arguments, "Executing tool");
    let result = tools.call_tool(call.name(), arguments).await?;
    Ok(format_tool_result(&result))
}

/// Renders a tool result for the transcript.
///
/// Command results become `Command:` / `Exit code:` lines followed by any
/// non-empty output streams; everything else becomes an `Error:` line.
pub fn format_tool_result(result: &CallToolResult) -> String {
    let Some(text) = result.first_text() else {
        return "Error: No result from tool server".to_string();
    };

    let payload = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(payload)) => payload,
        _ if text.starts_with("Error:") => return text.to_string(),
        _ => return format!("Error: {}", text),
    };

    if let Some(error) = payload.get("error") {
        return match error {
            Value::String(message) => format!("Error: {}", message),
            other => format!("Error: {}", other),
        };
    }

    let field = |name: &str| match payload.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "N/A".to_string(),
    };

    let mut formatted = format!(
        "Command: {}\nExit code: {}\n",
        field("command"),
        field("returncode")
    );
    if let Some(stdout) = payload.get("stdout").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        formatted.push_str(&format!("Output:\n{}", stdout));
    }
    if let Some(stderr) = payload.get("stderr").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        formatted.push_str(&format!("Error:\n{}", stderr));
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::AssistantTurn;
    use crate::tool_server::protocol::execute_tool_descriptor;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted turns; repeats the last one when the script runs out.
    struct ScriptedBackend {
        turns: Vec<AssistantTurn>,
        calls: AtomicUsize,
        transcripts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(turns: Vec<AssistantTurn>) -> Arc<Self> {
            Arc::new(Self {
                turns,
                calls: AtomicUsize::new(0),
                transcripts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningBackend for ScriptedBackend {
        async fn next_step(
            &self,
            transcript: &[ChatMessage],
            _tools: &[ToolDescriptor],
        ) -> Result<AssistantTurn, LlmError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.transcripts.lock().unwrap().push(transcript.to_vec());
            let turn = self.turns.get(index).or(self.turns.last());
            Ok(turn.cloned().unwrap_or_default())
        }
    }

    struct CountingTools {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolInvoker for CountingTools {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
            Ok(vec![execute_tool_descriptor("/app")])
        }

        async fn call_tool(
            &self,
            _name: &str,
            arguments: Value,
        ) -> Result<CallToolResult, ToolServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let command = arguments["command"].as_str().unwrap_or_default().to_string();
            let payload = json!({"command": command, "returncode": 0, "stdout": "ok\n", "stderr": ""});
            Ok(CallToolResult::success(payload.to_string()))
        }
    }

    fn bash_call(id: &str, command: &str) -> AssistantTurn {
        AssistantTurn::with_tool_calls(
            None,
            vec![ToolCall::function(id, "execute_bash_command", &json!({"command": command}))],
        )
    }

    #[tokio::test]
    async fn test_zero_tool_calls_returns_immediately() {
        let backend = ScriptedBackend::new(vec![AssistantTurn::text("Nothing to do.")]);
        let tools = CountingTools { calls: AtomicUsize::new(0) };

        let answer = ToolCallLoop::new(backend.clone(), 10)
            .solve_with(&tools, "say hello")
            .await
            .expect("solve");

        assert_eq!(answer, "Nothing to do.");
        assert_eq!(tools.calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_iteration_limit_after_exact_rounds() {
        let backend = ScriptedBackend::new(vec![bash_call("call_1", "ls")]);
        let tools = CountingTools { calls: AtomicUsize::new(0) };

        let answer = ToolCallLoop::new(backend.clone(), 3)
            .solve_with(&tools, "loop forever")
            .await
            .expect("solve");

        assert_eq!(answer, ITERATION_LIMIT_TEXT);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(tools.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_final_content_and_transcript_shape() {
        let backend = ScriptedBackend::new(vec![
            bash_call("call_1", "pwd"),
            AssistantTurn::with_tool_calls(Some("  ".to_string()), vec![]),
        ]);
        let tools = CountingTools { calls: AtomicUsize::new(0) };

        let answer = ToolCallLoop::new(backend.clone(), 5)
            .solve_with(&tools, "where am I")
            .await
            .expect("solve");
        assert_eq!(answer, COMPLETED_TEXT);

        let transcripts = backend.transcripts.lock().unwrap();
        let second = &transcripts[1];
        let roles: Vec<&str> = second.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(
            second[3].content.as_deref(),
            Some("Command: pwd\nExit code: 0\nOutput:\nok\n")
        );
    }

    #[tokio::test]
    async fn test_invalid_arguments_become_error_result() {
        let mut broken = ToolCall::function("call_x", "execute_bash_command", &json!({}));
        broken.function.arguments = "{not json".to_string();
        let backend = ScriptedBackend::new(vec![
            AssistantTurn::with_tool_calls(None, vec![broken]),
            AssistantTurn::text("gave up"),
        ]);
        let tools = CountingTools { calls: AtomicUsize::new(0) };

        let answer = ToolCallLoop::new(backend.clone(), 5)
            .solve_with(&tools, "task")
            .await
            .expect("solve");
        assert_eq!(answer, "gave up");
        assert_eq!(tools.calls.load(Ordering::SeqCst), 0);

        let transcripts = backend.transcripts.lock().unwrap();
        let tool_message = &transcripts[1][3];
        assert!(tool_message
            .content
            .as_deref()
            .unwrap_or_default()
            .starts_with("Error: Invalid tool arguments"));
    }

    #[test]
    fn test_format_tool_result() {
        let ok = CallToolResult::success(
            json!({"command": "cat x", "returncode": 1, "stdout": "", "stderr": "cat: x: No such file\n"})
                .to_string(),
        );
        assert_eq!(
            format_tool_result(&ok),
            "Command: cat x\nExit code: 1\nError:\ncat: x: No such file\n"
        );

        let unknown = CallToolResult::error("Error: Unknown tool rm");
        assert_eq!(format_tool_result(&unknown), "Error: Unknown tool rm");

        let errored = CallToolResult::success(json!({"error": "boom"}).to_string());
        assert_eq!(format_tool_result(&errored), "Error: boom");

        let plain = CallToolResult::success("not json");
        assert_eq!(format_tool_result(&plain), "Error: not json");
    }
}
