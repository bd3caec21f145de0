//! A2A client: card discovery, health checks, and message exchange.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use super::types::{
    AgentCard, Message, MessageSendParams, StreamEvent, TaskState, AGENT_CARD_PATH,
};
use crate::error::A2aError;
use crate::jsonrpc::{decode_body, JsonRpcRequest, JsonRpcResponse};

/// Returned by [`A2aClient::send_text`] when the agent streamed no text.
pub const NO_RESPONSE_TEXT: &str = "No response from agent.";

/// Reassembled result of a streaming exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamedReply {
    pub context_id: Option<String>,
    /// Concatenated text fragments, trimmed.
    pub text: String,
    /// Last task state reported, if any.
    pub final_state: Option<TaskState>,
}

#[derive(Debug, Clone)]
pub struct A2aClient {
    http: Client,
    message_timeout: Duration,
    health_timeout: Duration,
}

impl A2aClient {
    pub fn new(message_timeout: Duration, health_timeout: Duration) -> Result<Self, A2aError> {
        let http = Client::builder()
            .build()
            .map_err(|e| A2aError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            message_timeout,
            health_timeout,
        })
    }

    pub fn message_timeout(&self) -> Duration {
        self.message_timeout
    }

    /// Fetches the agent card from the discovery path.
    pub async fn get_agent_card(&self, base_url: &str) -> Result<AgentCard, A2aError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH);
        let response = self
            .http
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| request_error(&url, self.health_timeout, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(&url, self.health_timeout, e))?;
        if !status.is_success() {
            return Err(A2aError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// True when the agent serves a well-formed card within the health timeout.
    pub async fn check_health(&self, base_url: &str) -> bool {
        match self.get_agent_card(base_url).await {
            Ok(card) => {
                tracing::debug!(url = %base_url, agent = %card.name, "Agent healthy");
                true
            }
            Err(e) => {
                tracing::debug!(url = %base_url, error = %e, "Agent health check failed");
                false
            }
        }
    }

    /// Non-streaming `message/send`; the agent must answer with a message.
    pub async fn send_message(
        &self,
        base_url: &str,
        text: &str,
        context_id: Option<&str>,
    ) -> Result<Message, A2aError> {
        let events = self.exchange(base_url, "message/send", text, context_id).await?;
        match events.into_iter().last() {
            Some(StreamEvent::Message(message)) => Ok(message),
            Some(StreamEvent::Task(task)) => Err(A2aError::Protocol(format!(
                "expected a message reply, got task {}",
                task.id
            ))),
            Some(_) => Err(A2aError::Protocol(
                "expected a message reply, got a task update".to_string(),
            )),
            None => Err(A2aError::Protocol("empty reply".to_string())),
        }
    }

    /// `message/stream`, reassembling text from every event in arrival order.
    pub async fn send_message_streaming(
        &self,
        base_url: &str,
        text: &str,
        context_id: Option<&str>,
    ) -> Result<StreamedReply, A2aError> {
        let events = self
            .exchange(base_url, "message/stream", text, context_id)
            .await?;

        let mut reply = StreamedReply {
            context_id: None,
            text: String::new(),
            final_state: None,
        };
        for event in &events {
            if reply.context_id.is_none() {
                reply.context_id = event.context_id().map(str::to_string);
            }
            if let StreamEvent::StatusUpdate(update) = event {
                reply.final_state = Some(update.status.state);
            }
            for fragment in event.text_fragments() {
                reply.text.push_str(fragment);
            }
        }
        reply.text = reply.text.trim().to_string();
        Ok(reply)
    }

    /// Streams `text` and returns the reply text. Never fails: errors come
    /// back as `Error: ...` text and silence as [`NO_RESPONSE_TEXT`].
    pub async fn send_text(&self, base_url: &str, text: &str) -> String {
        match self.send_message_streaming(base_url, text, None).await {
            Ok(reply) if reply.text.is_empty() => NO_RESPONSE_TEXT.to_string(),
            Ok(reply) => {
                tracing::info!(url = %base_url, chars = reply.text.len(), "Received agent response");
                reply.text
            }
            Err(e) => {
                tracing::error!(url = %base_url, error = %e, "Agent error");
                format!("Error: {}", e)
            }
        }
    }

    async fn exchange(
        &self,
        base_url: &str,
        method: &str,
        text: &str,
        context_id: Option<&str>,
    ) -> Result<Vec<StreamEvent>, A2aError> {
        let url = format!("{}/", base_url.trim_end_matches('/'));
        let params = MessageSendParams {
            message: Message::user_text(text, context_id),
            configuration: None,
        };
        let request = JsonRpcRequest::new(
            json!(super::types::new_id()),
            method,
            serde_json::to_value(&params)?,
        );

        let response = self
            .http
            .post(&url)
            .timeout(self.message_timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(&url, self.message_timeout, e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .text()
            .await
            .map_err(|e| request_error(&url, self.message_timeout, e))?;

        if !status.is_success() {
            return Err(A2aError::Http {
                status: status.as_u16(),
                body,
            });
        }

        decode_body(content_type.as_deref(), &body)?
            .into_iter()
            .map(decode_event)
            .collect()
    }
}

fn decode_event(payload: Value) -> Result<StreamEvent, A2aError> {
    let envelope: JsonRpcResponse = serde_json::from_value(payload)?;
    match envelope.into_result() {
        Ok(result) => StreamEvent::from_value(result),
        Err(error) => Err(A2aError::Rpc {
            code: error.code,
            message: error.message,
        }),
    }
}

fn request_error(url: &str, timeout: Duration, error: reqwest::Error) -> A2aError {
    if error.is_timeout() {
        A2aError::Timeout {
            url: url.to_string(),
            secs: timeout.as_secs(),
        }
    } else {
        A2aError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    fn client() -> A2aClient {
        A2aClient::new(Duration::from_secs(2), Duration::from_secs(1)).expect("client")
    }

    #[tokio::test]
    async fn test_health_check_false_when_unreachable() {
        assert!(!client().check_health(&closed_port_url()).await);
    }

    #[tokio::test]
    async fn test_send_text_reports_transport_error_as_text() {
        let text = client().send_text(&closed_port_url(), "hi").await;
        assert!(text.starts_with("Error: "));
    }

    #[test]
    fn test_decode_event_maps_rpc_error() {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": {"code": -32601, "message": "Method not found"}
        });
        let err = decode_event(payload).unwrap_err();
        assert!(matches!(err, A2aError::Rpc { code: -32601, .. }));
    }
}
