//! JSON-RPC 2.0 envelopes shared by the tool-invocation and A2A protocols.
//!
//! Both protocols may answer with either a plain JSON body or a
//! `text/event-stream` body whose `data:` lines carry JSON-RPC responses;
//! [`parse_sse_events`] handles the latter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: Value::Null,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Splits the envelope into its result or error object.
    ///
    /// A response with neither field is treated as a `null` result.
    pub fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Extracts every JSON payload from an SSE body, in arrival order.
///
/// Consecutive `data:` lines of one event are joined with newlines before
/// parsing; events whose data is not JSON are skipped.
pub fn parse_sse_events(body: &str) -> Vec<Value> {
    let mut events = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    let mut flush = |pending: &mut Vec<&str>| {
        if pending.is_empty() {
            return;
        }
        let joined = pending.join("\n");
        pending.clear();
        if let Ok(value) = serde_json::from_str::<Value>(joined.trim()) {
            events.push(value);
        }
    };

    for line in body.lines() {
        if line.trim().is_empty() {
            flush(&mut pending);
        } else if let Some(data) = line.strip_prefix("data:") {
            pending.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    flush(&mut pending);

    events
}

/// Decodes a response body into JSON-RPC payloads according to its content type.
pub fn decode_body(content_type: Option<&str>, body: &str) -> Result<Vec<Value>, serde_json::Error> {
    let is_sse = content_type
        .map(|ct| ct.starts_with("text/event-stream"))
        .unwrap_or(false);
    if is_sse {
        Ok(parse_sse_events(body))
    } else {
        serde_json::from_str::<Value>(body).map(|value| vec![value])
    }
}
