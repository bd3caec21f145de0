//! HTTP surface of a tool server: JSON-RPC on [`RPC_PATH`] plus `/health`.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::protocol::{
    execute_tool_descriptor, CallToolParams, CallToolResult, ListToolsResult, EXECUTE_TOOL_NAME,
    PROTOCOL_VERSION, RPC_PATH, SESSION_HEADER,
};
use crate::jsonrpc::{codes, JsonRpcRequest, JsonRpcResponse};
use crate::metrics::MetricsCollector;
use crate::sandbox::{CommandExecutor, CommandResult, SandboxTarget};

/// Everything a request handler needs, bound to one sandbox.
#[derive(Clone)]
pub struct ToolService {
    executor: Arc<dyn CommandExecutor>,
    sandbox: SandboxTarget,
    working_dir: String,
    metrics: MetricsCollector,
}

impl ToolService {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        sandbox: SandboxTarget,
        working_dir: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            sandbox,
            working_dir: working_dir.into(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn sandbox(&self) -> &SandboxTarget {
        &self.sandbox
    }

    /// Runs `command` in this service's sandbox.
    pub async fn execute_command(&self, command: &str) -> CommandResult {
        self.executor.execute(&self.sandbox, command).await
    }

    /// Dispatches a `tools/call`. Unknown tools and bad arguments are error
    /// content, never transport faults.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> CallToolResult {
        if name != EXECUTE_TOOL_NAME {
            tracing::warn!(tool = %name, container = %self.sandbox, "Unknown tool requested");
            self.metrics.record_tool_call(name, "unknown_tool", 0.0);
            return CallToolResult::error(format!("Error: Unknown tool {}", name));
        }

        let command = match arguments.get("command").and_then(Value::as_str) {
            Some(command) if !command.is_empty() => command,
            _ => {
                self.metrics.record_tool_call(name, "invalid_arguments", 0.0);
                return CallToolResult::error("Error: Command is required");
            }
        };

        let started = Instant::now();
        let result = self.execute_command(command).await;
        let status = if result.is_execution_failure() {
            "execution_failure"
        } else {
            "ok"
        };
        self.metrics
            .record_tool_call(name, status, started.elapsed().as_secs_f64());

        tracing::info!(
            container = %self.sandbox,
            exit_code = result.exit_code,
            command = %crate::sandbox::truncate(command, 200),
            "Tool call executed"
        );

        match serde_json::to_string_pretty(&result) {
            Ok(text) => CallToolResult::success(text),
            Err(e) => CallToolResult::error(format!("Error: {}", e)),
        }
    }

    fn dispatch_result(&self, request: &JsonRpcRequest) -> Option<Result<Value, (i64, String)>> {
        match request.method.as_str() {
            "initialize" => Some(Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": "agent-arena-tool-server", "version": env!("CARGO_PKG_VERSION") },
            }))),
            "ping" => Some(Ok(json!({}))),
            "tools/list" => {
                let listing = ListToolsResult {
                    tools: vec![execute_tool_descriptor(&self.working_dir)],
                };
                Some(serde_json::to_value(listing).map_err(|e| (codes::INTERNAL_ERROR, e.to_string())))
            }
            // Handled asynchronously by the caller.
            "tools/call" => None,
            other => Some(Err((
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ))),
        }
    }
}

pub fn router(service: ToolService) -> Router {
    Router::new()
        .route(RPC_PATH, post(handle_rpc))
        .route("/health", get(health))
        .with_state(service)
}

async fn health(State(service): State<ToolService>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sandbox": service.sandbox().as_str(),
        "tool": EXECUTE_TOOL_NAME,
    }))
}

async fn handle_rpc(State(service): State<ToolService>, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = JsonRpcResponse::failure(
                Value::Null,
                codes::PARSE_ERROR,
                format!("Parse error: {}", e),
            );
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let Some(id) = request.id.clone() else {
        tracing::debug!(method = %request.method, "Notification received");
        return StatusCode::ACCEPTED.into_response();
    };

    let outcome = match service.dispatch_result(&request) {
        Some(outcome) => outcome,
        None => match serde_json::from_value::<CallToolParams>(request.params.clone()) {
            Ok(params) => {
                let result = service.call_tool(&params.name, &params.arguments).await;
                serde_json::to_value(result).map_err(|e| (codes::INTERNAL_ERROR, e.to_string()))
            }
            Err(e) => Err((codes::INVALID_PARAMS, format!("Invalid params: {}", e))),
        },
    };

    let response = match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err((code, message)) => JsonRpcResponse::failure(id, code, message),
    };

    let mut http_response = Json(response).into_response();
    if request.method == "initialize" {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            http_response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    http_response
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandExecutor for EchoExecutor {
        async fn execute(&self, _sandbox: &SandboxTarget, command: &str) -> CommandResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CommandResult {
                command: command.to_string(),
                exit_code: 0,
                stdout: format!("ran {}\n", command),
                stderr: String::new(),
            }
        }
    }

    fn service() -> (ToolService, Arc<EchoExecutor>) {
        let executor = Arc::new(EchoExecutor {
            calls: AtomicUsize::new(0),
        });
        let service = ToolService::new(executor.clone(), SandboxTarget::new("tb-hello"), "/app");
        (service, executor)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_content() {
        let (service, executor) = service();
        let result = service.call_tool("delete_everything", &json!({})).await;
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Error: Unknown tool delete_everything"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_command_is_error_content() {
        let (service, _) = service();
        for args in [json!({}), json!({"command": 42}), json!({"command": ""})] {
            let result = service.call_tool(EXECUTE_TOOL_NAME, &args).await;
            assert!(result.is_error);
            assert_eq!(result.first_text(), Some("Error: Command is required"));
        }
    }

    #[tokio::test]
    async fn test_execute_returns_json_command_result() {
        let (service, executor) = service();
        let result = service
            .call_tool(EXECUTE_TOOL_NAME, &json!({"command": "ls"}))
            .await;
        assert!(!result.is_error);
        let payload: Value =
            serde_json::from_str(result.first_text().expect("text")).expect("json payload");
        assert_eq!(
            payload,
            json!({"command": "ls", "returncode": 0, "stdout": "ran ls\n", "stderr": ""})
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_method_maps_to_method_not_found() {
        let (service, _) = service();
        let request = JsonRpcRequest::new(1, "resources/list", json!({}));
        let outcome = service.dispatch_result(&request).expect("handled synchronously");
        let (code, _) = outcome.unwrap_err();
        assert_eq!(code, codes::METHOD_NOT_FOUND);
    }
}
