//! OpenAI-compatible chat-completions client with tool calling.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{AssistantTurn, ChatMessage, ToolCall};
use crate::config::SolverSettings;
use crate::error::LlmError;
use crate::metrics::MetricsCollector;
use crate::tool_server::protocol::ToolDescriptor;

/// Default endpoint when neither `OPENAI_API_BASE` nor `solver.api_base` is set.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Produces the next assistant step for a transcript.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn next_step(
        &self,
        transcript: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, LlmError>;
}

/// Client for OpenAI-compatible `/chat/completions` APIs.
pub struct ChatCompletionsBackend {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    http_client: Client,
    metrics: MetricsCollector,
}

impl ChatCompletionsBackend {
    /// Create a client with explicit configuration.
    ///
    /// * `api_base` - Base URL, e.g. "https://api.openai.com/v1"
    /// * `api_key` - Bearer token, if the endpoint needs one
    /// * `model` - Model name sent with every request
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
            http_client,
            metrics: MetricsCollector::new(),
        })
    }

    /// Build from solver settings and the environment.
    ///
    /// Reads `OPENAI_API_KEY` (required) and `OPENAI_API_BASE` (optional,
    /// takes precedence over `solver.api_base`).
    pub fn from_settings(settings: &SolverSettings) -> Result<Self, LlmError> {
        let api_key = crate::config::openai_api_key().map_err(|_| LlmError::MissingApiKey)?;
        let api_base = env::var("OPENAI_API_BASE")
            .ok()
            .or_else(|| settings.api_base.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Self::new(
            api_base,
            Some(api_key),
            settings.model.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, body: &ApiRequest<'_>) -> Result<AssistantTurn, LlmError> {
        let url = format!("{}/chat/completions", self.api_base);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout.as_secs())
            } else {
                LlmError::RequestFailed(e.to_string())
            }
        })?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("response has no choices".to_string()))?;

        Ok(AssistantTurn::with_tool_calls(
            choice.message.content,
            choice.message.tool_calls.unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl ReasoningBackend for ChatCompletionsBackend {
    async fn next_step(
        &self,
        transcript: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, LlmError> {
        let body = ApiRequest {
            model: &self.model,
            messages: transcript,
            tools: tools.iter().map(ToolDescriptor::to_function_spec).collect(),
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
        };

        let result = self.request(&body).await;
        self.metrics.record_llm_request(result.is_ok());
        if let Err(ref e) = result {
            tracing::warn!(model = %self.model, error = %e, "Reasoning backend request failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_server::protocol::execute_tool_descriptor;
    use serde_json::json;

    #[test]
    fn test_request_serialization_includes_tools() {
        let messages = vec![ChatMessage::user("list files")];
        let body = ApiRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            tools: vec![execute_tool_descriptor("/app").to_function_spec()],
            tool_choice: Some("auto"),
        };
        let wire = serde_json::to_value(&body).expect("json");
        assert_eq!(wire["tool_choice"], "auto");
        assert_eq!(wire["tools"][0]["function"]["name"], "execute_bash_command");
        assert_eq!(wire["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_with_null_tool_calls_parses() {
        let response: ApiResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "done", "tool_calls": null},
                "finish_reason": "stop"
            }]
        }))
        .expect("parse");
        let message = &response.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("done"));
        assert!(message.tool_calls.is_none());
    }

    #[test]
    fn test_response_tool_calls_parse() {
        let response: ApiResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "execute_bash_command", "arguments": "{\"command\":\"echo hi\"}"}
                    }]
                }
            }]
        }))
        .expect("parse");
        let calls = response.choices[0].message.tool_calls.clone().expect("calls");
        assert_eq!(calls[0].name(), "execute_bash_command");
        assert_eq!(calls[0].parsed_arguments().expect("args"), json!({"command": "echo hi"}));
    }

    #[tokio::test]
    async fn test_connection_error_is_request_failed() {
        let backend = ChatCompletionsBackend::new(
            "http://localhost:65535",
            None,
            "gpt-4o-mini",
            Duration::from_secs(5),
        )
        .expect("client");

        let result = backend
            .next_step(&[ChatMessage::user("test")], &[])
            .await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
