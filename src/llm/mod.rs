//! Reasoning backends for the solver.
//!
//! The solver drives any [`ReasoningBackend`]; the production one is
//! [`ChatCompletionsBackend`], which speaks the OpenAI chat-completions API
//! with function tools built from the tool server's catalog.
//!
//! ```ignore
//! use agent_arena::llm::{ChatCompletionsBackend, ChatMessage, ReasoningBackend};
//!
//! let backend = ChatCompletionsBackend::from_settings(&settings.solver)?;
//! let turn = backend.next_step(&[ChatMessage::user("ls /app")], &tools).await?;
//! ```

pub mod completions;
pub mod types;

pub use completions::{ChatCompletionsBackend, ReasoningBackend, DEFAULT_API_BASE};
pub use types::{AssistantTurn, ChatMessage, FunctionCall, ToolCall};
