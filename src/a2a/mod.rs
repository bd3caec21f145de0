//! Agent-to-agent messaging: wire types, client and server host.

pub mod client;
pub mod server;
pub mod types;

pub use client::{A2aClient, StreamedReply, NO_RESPONSE_TEXT};
pub use server::{AgentExecutor, AgentReply, AgentRequest, AgentServer, RunningAgentServer};
pub use types::{AgentCard, AgentSkill, Message, StreamEvent, TaskState};
