//! Turn-by-turn conversation between an evaluator environment and a solver.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::environment::{Action, Environment, RESPOND_ACTION_NAME};
use super::tags::find_blocks;
use super::DriverError;
use crate::a2a::{A2aClient, Message};
use crate::error::A2aError;
use crate::metrics::MetricsCollector;

/// Tag the solver must wrap its decision in.
pub const DECISION_TAG: &str = "json";

/// Transport to the solver: one text turn out, one message back.
#[async_trait]
pub trait SolverChannel: Send + Sync {
    async fn send(&self, text: &str, context_id: Option<&str>) -> Result<Message, A2aError>;
}

/// [`SolverChannel`] over A2A `message/send`.
pub struct A2aSolverChannel {
    client: A2aClient,
    url: String,
}

impl A2aSolverChannel {
    pub fn new(client: A2aClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SolverChannel for A2aSolverChannel {
    async fn send(&self, text: &str, context_id: Option<&str>) -> Result<Message, A2aError> {
        self.client.send_message(&self.url, text, context_id).await
    }
}

/// Per-trial conversation state. Owned by one driver run, never shared.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub context_id: Option<String>,
    pub turn_count: usize,
    pub last_action: Option<Action>,
    pub done: bool,
    pub reward: f64,
}

impl ConversationState {
    /// Adopts the context id of the first reply; later replies must match it.
    pub fn observe_context(&mut self, reply_context: Option<&str>) -> Result<(), DriverError> {
        if self.turn_count == 0 {
            self.context_id = reply_context.map(str::to_string);
            return Ok(());
        }
        if self.context_id.as_deref() != reply_context {
            return Err(DriverError::ContextMismatch {
                expected: self.context_id.clone().unwrap_or_default(),
                actual: reply_context.unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }
}

/// Final reward and merged diagnostics of one trial.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrialOutcome {
    pub reward: f64,
    pub info: Map<String, Value>,
}

impl TrialOutcome {
    pub fn error(&self) -> Option<&str> {
        self.info.get("error").and_then(Value::as_str)
    }
}

pub struct ConversationDriver<C> {
    channel: C,
    max_turns: usize,
    metrics: MetricsCollector,
}

impl<C: SolverChannel> ConversationDriver<C> {
    pub fn new(channel: C, max_turns: usize) -> Self {
        Self {
            channel,
            max_turns,
            metrics: MetricsCollector::new(),
        }
    }

    /// Plays task `task_index` of `env` against the solver.
    ///
    /// # Errors
    ///
    /// Transport failures, context id changes, replies without exactly one
    /// text part or decision block, and undecodable actions end the trial.
    pub async fn run(
        &self,
        env: &mut dyn Environment,
        task_index: usize,
    ) -> Result<TrialOutcome, DriverError> {
        let reset = env
            .reset(task_index)
            .await
            .map_err(|e| DriverError::Environment(e.to_string()))?;

        let mut info = reset.info;
        let mut state = ConversationState::default();
        let mut outbound = initial_turn(env.wiki(), env.tools_info(), &reset.observation);

        while state.turn_count < self.max_turns && !state.done {
            tracing::debug!(
                task_index,
                turn = state.turn_count + 1,
                context_id = state.context_id.as_deref().unwrap_or("-"),
                "Sending turn to solver"
            );

            let reply = self
                .channel
                .send(&outbound, state.context_id.as_deref())
                .await?;
            state.observe_context(reply.context_id.as_deref())?;
            state.turn_count += 1;
            self.metrics.record_turn();

            let action = decode_action(&reply)?;
            let step = env
                .step(&action)
                .await
                .map_err(|e| DriverError::Environment(e.to_string()))?;

            state.reward = step.reward;
            state.done = step.done;
            info.extend(step.info);
            outbound = next_turn(&action, &step.observation);

            tracing::info!(
                task_index,
                turn = state.turn_count,
                action = %action.name,
                reward = step.reward,
                done = step.done,
                "Turn applied"
            );
            state.last_action = Some(action);
        }

        if !state.done {
            tracing::info!(task_index, turns = state.turn_count, "Turn budget exhausted");
        }

        Ok(TrialOutcome {
            reward: state.reward,
            info,
        })
    }

    /// Like [`Self::run`], but a failed trial scores zero with the error
    /// text under `info["error"]`.
    pub async fn evaluate(&self, env: &mut dyn Environment, task_index: usize) -> TrialOutcome {
        match self.run(env, task_index).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(task_index, error = %e, "Trial failed");
                let mut info = Map::new();
                info.insert("error".to_string(), Value::String(e.to_string()));
                TrialOutcome { reward: 0.0, info }
            }
        }
    }
}

/// Extracts the single text part and the single decision block from a reply.
pub fn decode_action(reply: &Message) -> Result<Action, DriverError> {
    let text_parts = reply.text_parts();
    if text_parts.len() != 1 {
        return Err(DriverError::TextParts(text_parts.len()));
    }

    let blocks = find_blocks(text_parts[0], DECISION_TAG);
    if blocks.len() != 1 {
        return Err(DriverError::DecisionBlocks(blocks.len()));
    }

    serde_json::from_str(blocks[0]).map_err(|e| DriverError::MalformedAction(e.to_string()))
}

/// First message of a trial: reference material, catalog, reply format and
/// the opening user message.
pub fn initial_turn(wiki: &str, tools_info: &[Value], observation: &str) -> String {
    let tools = serde_json::to_string_pretty(tools_info).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{wiki}\n\
         Here's a list of tools you can use (you can use at most one tool at a time):\n\
         {tools}\n\
         Please response in the JSON format. Please wrap the JSON part with <json>...</json> tags.\n\
         The JSON should contain:\n\
         - \"name\": the tool call function name, or \"{respond}\" if you want to respond directly.\n\
         - \"kwargs\": the arguments for the tool call, or {{\"content\": \"your message here\"}} if you want to respond directly.\n\
         \n\
         Next, I'll provide you with the user message and tool call results.\n\
         User message: {observation}",
        respond = RESPOND_ACTION_NAME,
    )
}

/// Frames an observation as a tool result or a new user message, depending
/// on the action that produced it.
pub fn next_turn(action: &Action, observation: &str) -> String {
    if action.is_respond() {
        format!("User message:\n{}", observation)
    } else {
        format!("Tool call result:\n{}", observation)
    }
}
