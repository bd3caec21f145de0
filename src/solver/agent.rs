//! The solver as an A2A agent.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use super::tool_loop::ToolCallLoop;
use crate::a2a::{AgentCard, AgentExecutor, AgentReply, AgentRequest, AgentSkill};

fn tool_server_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Tool Server URL: (.+)").expect("static regex"))
}

/// Pulls the tool server address out of a task message.
pub fn extract_tool_server_url(text: &str) -> Option<String> {
    tool_server_url_pattern()
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Solves terminal tasks with a [`ToolCallLoop`] against the tool server
/// named in each request.
pub struct SolverAgent {
    tool_loop: Arc<ToolCallLoop>,
}

impl SolverAgent {
    pub fn new(tool_loop: ToolCallLoop) -> Self {
        Self {
            tool_loop: Arc::new(tool_loop),
        }
    }

    pub fn card(name: &str) -> AgentCard {
        AgentCard::text_agent(
            name,
            "Terminal task solver that executes bash commands through a per-task tool server",
            AgentSkill {
                id: "terminal_task_solving".to_string(),
                name: "Terminal task solving".to_string(),
                description: "Completes shell tasks inside a sandbox via execute_bash_command"
                    .to_string(),
                tags: vec!["terminal".to_string(), "bash".to_string()],
                examples: vec![],
            },
        )
    }
}

#[async_trait]
impl AgentExecutor for SolverAgent {
    async fn execute(&self, request: AgentRequest) -> AgentReply {
        let Some(url) = extract_tool_server_url(&request.text) else {
            tracing::error!(context_id = %request.context_id, "No tool server URL in request");
            return AgentReply::failed("Error: Tool Server URL not found");
        };

        tracing::info!(context_id = %request.context_id, tool_server = %url, "Solving task");
        match self.tool_loop.solve(&request.text, &url).await {
            Ok(answer) => AgentReply::completed(answer),
            Err(e) => {
                tracing::error!(tool_server = %url, error = %e, "Solve failed");
                AgentReply::failed(format!("Error: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::Message;
    use crate::error::LlmError;
    use crate::llm::{AssistantTurn, ChatMessage, ReasoningBackend};
    use crate::tool_server::ToolDescriptor;

    struct Silent;

    #[async_trait]
    impl ReasoningBackend for Silent {
        async fn next_step(
            &self,
            _transcript: &[ChatMessage],
            _tools: &[ToolDescriptor],
        ) -> Result<AssistantTurn, LlmError> {
            Ok(AssistantTurn::default())
        }
    }

    fn request(text: &str) -> AgentRequest {
        AgentRequest {
            text: text.to_string(),
            context_id: "ctx".to_string(),
            task_id: "task".to_string(),
            message: Message::user_text(text, None),
        }
    }

    #[test]
    fn test_extract_tool_server_url() {
        let text = "TASK: list files\n\nTool Server URL: http://localhost:10003 \n\nENVIRONMENT:";
        assert_eq!(
            extract_tool_server_url(text).as_deref(),
            Some("http://localhost:10003")
        );
        assert!(extract_tool_server_url("no address here").is_none());
    }

    #[tokio::test]
    async fn test_missing_url_replies_failed() {
        let agent = SolverAgent::new(ToolCallLoop::new(Arc::new(Silent), 3));
        let reply = agent.execute(request("just do it")).await;
        assert!(reply.failed);
        assert_eq!(reply.text, "Error: Tool Server URL not found");
    }

    #[tokio::test]
    async fn test_unreachable_tool_server_replies_error_text() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let agent = SolverAgent::new(ToolCallLoop::new(Arc::new(Silent), 3));
        let reply = agent
            .execute(request(&format!("Tool Server URL: http://127.0.0.1:{}", port)))
            .await;
        assert!(reply.failed);
        assert!(reply.text.starts_with("Error: Tool server error"));
    }
}
