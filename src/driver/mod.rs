//! Multi-turn conversation driver.
//!
//! The [`ConversationDriver`] resets an [`Environment`], sends the solver an
//! opening turn with the reference material and action catalog, then loops:
//! one reply, one `<json>{"name": .., "kwargs": ..}</json>` decision, one
//! environment step, until the environment reports done or the turn budget
//! runs out. Protocol violations end the trial; [`ConversationDriver::evaluate`]
//! turns them into a zero-reward outcome with the error in `info`.

pub mod conversation;
pub mod environment;
pub mod evaluator;
pub mod tags;

use thiserror::Error;

pub use conversation::{
    A2aSolverChannel, ConversationDriver, ConversationState, SolverChannel, TrialOutcome,
};
pub use environment::{
    Action, EnvConfig, EnvReset, EnvStep, Environment, EnvironmentFactory, RESPOND_ACTION_NAME,
};
pub use evaluator::TauEvaluatorAgent;

use crate::error::A2aError;

/// Fatal, non-retried failures of one trial.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Solver transport failed: {0}")]
    Transport(#[from] A2aError),

    #[error("Context id changed mid-conversation: expected '{expected}', got '{actual}'")]
    ContextMismatch { expected: String, actual: String },

    #[error("Expected exactly one text part in solver reply, got {0}")]
    TextParts(usize),

    #[error("Expected exactly one <json> decision block, got {0}")]
    DecisionBlocks(usize),

    #[error("Malformed action: {0}")]
    MalformedAction(String),

    #[error("Environment error: {0}")]
    Environment(String),
}
