//! Error types for agent-arena operations.
//!
//! Defines the error types shared across subsystems:
//! - Reasoning backend (LLM) API interactions
//! - The A2A messaging protocol
//! - The per-task tool server and its client
//!
//! Sandbox command failures are not errors: they are reported as
//! [`crate::sandbox::CommandResult`] data with `exit_code == -1`.

use thiserror::Error;

/// Errors that can occur during reasoning backend operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while talking to an A2A agent.
#[derive(Debug, Error)]
pub enum A2aError {
    #[error("Failed to reach agent at {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Agent at {url} did not answer within {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("Agent returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Agent returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while running or calling a tool server.
#[derive(Debug, Error)]
pub enum ToolServerError {
    #[error("Failed to bind tool server on {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("Tool server on port {port} not ready after {attempts} probes")]
    StartupFailed { port: u16, attempts: u32 },

    #[error("Tool server request failed: {0}")]
    Transport(String),

    #[error("Tool server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Tool server returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed tool server response: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ToolServerError::StartupFailed {
            port: 10_003,
            attempts: 20,
        };
        assert_eq!(
            err.to_string(),
            "Tool server on port 10003 not ready after 20 probes"
        );

        let err = A2aError::Timeout {
            url: "http://localhost:9002".to_string(),
            secs: 5,
        };
        assert!(err.to_string().contains("9002"));

        let err = LlmError::ApiError {
            code: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API error (500): boom");
    }
}
