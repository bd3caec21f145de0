//! agent-arena: evaluation arena for autonomous agents.
//!
//! An evaluator agent drives a solver agent through multi-turn tasks over
//! A2A. For shell tasks every trial gets its own ephemeral tool server bound
//! to one sandbox container, which the solver calls back into to run bash.

pub mod a2a;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod harness;
pub mod jsonrpc;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod solver;
pub mod tool_server;

// Re-export commonly used error types
pub use config::ConfigError;
pub use driver::DriverError;
pub use error::{A2aError, LlmError, ToolServerError};
