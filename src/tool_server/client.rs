//! Solver-side client for a tool server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::protocol::{
    CallToolResult, ListToolsResult, ToolDescriptor, PROTOCOL_VERSION, RPC_PATH, SESSION_HEADER,
};
use crate::error::ToolServerError;
use crate::jsonrpc::{decode_body, JsonRpcRequest, JsonRpcResponse};

/// Anything that can list and call tools. Implemented by
/// [`ToolServerClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError>;

    async fn call_tool(&self, name: &str, arguments: Value)
        -> Result<CallToolResult, ToolServerError>;
}

pub struct ToolServerClient {
    http: Client,
    endpoint: String,
    session_id: Option<String>,
    next_id: AtomicU64,
}

impl ToolServerClient {
    /// Connects to `base_url` and performs the `initialize` handshake.
    pub async fn connect(base_url: &str, timeout: Duration) -> Result<Self, ToolServerError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolServerError::Transport(e.to_string()))?;

        let mut client = Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), RPC_PATH),
            session_id: None,
            next_id: AtomicU64::new(1),
        };

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "agent-arena-solver", "version": env!("CARGO_PKG_VERSION") },
        });
        let (result, session_id) = client.send(JsonRpcRequest::new(0, "initialize", params)).await?;
        client.session_id = session_id;

        let server_name = result
            .as_ref()
            .and_then(|r| r.pointer("/serverInfo/name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(endpoint = %client.endpoint, server = server_name, "Connected to tool server");

        client
            .send(JsonRpcRequest::notification("notifications/initialized"))
            .await?;

        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ToolServerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (result, _) = self.send(JsonRpcRequest::new(id, method, params)).await?;
        result.ok_or_else(|| ToolServerError::Protocol(format!("no response to {}", method)))
    }

    /// Posts one request; returns the result (None for notifications) and any session header.
    async fn send(
        &self,
        request: JsonRpcRequest,
    ) -> Result<(Option<Value>, Option<String>), ToolServerError> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream");
        if let Some(session_id) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session_id);
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolServerError::Transport(e.to_string()))?;

        let status = response.status();
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .text()
            .await
            .map_err(|e| ToolServerError::Transport(e.to_string()))?;

        if request.is_notification() && (status == StatusCode::ACCEPTED || status.is_success()) {
            return Ok((None, session_id));
        }
        if !status.is_success() {
            return Err(ToolServerError::Http {
                status: status.as_u16(),
                body: crate::sandbox::truncate(&body, 500),
            });
        }

        let payloads = decode_body(content_type.as_deref(), &body)?;
        let envelope = payloads
            .into_iter()
            .rev()
            .find_map(|value| serde_json::from_value::<JsonRpcResponse>(value).ok())
            .ok_or_else(|| ToolServerError::Protocol("no JSON-RPC response in body".to_string()))?;

        match envelope.into_result() {
            Ok(result) => Ok((Some(result), session_id)),
            Err(error) => Err(ToolServerError::Rpc {
                code: error.code,
                message: error.message,
            }),
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolServerClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        let result = self.call("tools/list", json!({})).await?;
        let listing: ListToolsResult = serde_json::from_value(result)?;
        Ok(listing.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ToolServerError> {
        tracing::debug!(tool = %name, arguments = %arguments, "Calling tool");
        let result = self
            .call("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}
