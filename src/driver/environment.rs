//! Evaluator-side task environment abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action name meaning "reply to the user" rather than call a tool.
pub const RESPOND_ACTION_NAME: &str = "respond";

/// A decision taken by the solver: a tool name and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Action {
    pub fn respond(content: impl Into<String>) -> Self {
        let mut kwargs = Map::new();
        kwargs.insert("content".to_string(), Value::String(content.into()));
        Self {
            name: RESPOND_ACTION_NAME.to_string(),
            kwargs,
        }
    }

    pub fn is_respond(&self) -> bool {
        self.name == RESPOND_ACTION_NAME
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvReset {
    pub observation: String,
    pub info: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct EnvStep {
    pub observation: String,
    pub reward: f64,
    pub done: bool,
    pub info: Map<String, Value>,
}

/// A multi-turn task the driver plays against a solver.
#[async_trait]
pub trait Environment: Send {
    /// Reference material (policies, domain rules) shown to the solver.
    fn wiki(&self) -> &str;

    /// Action catalog in OpenAI function format.
    fn tools_info(&self) -> &[Value];

    async fn reset(&mut self, task_index: usize) -> anyhow::Result<EnvReset>;

    async fn step(&mut self, action: &Action) -> anyhow::Result<EnvStep>;
}

/// Parameters the tau-style evaluator receives in `<env_config>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub env: String,
    #[serde(default)]
    pub user_strategy: Option<String>,
    #[serde(default)]
    pub user_model: Option<String>,
    #[serde(default)]
    pub user_provider: Option<String>,
    #[serde(default)]
    pub task_split: Option<String>,
    #[serde(default)]
    pub task_ids: Vec<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Builds environments for the tau-style evaluator agent.
pub trait EnvironmentFactory: Send + Sync {
    fn create(&self, config: &EnvConfig, task_index: usize) -> anyhow::Result<Box<dyn Environment>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_kwargs_default_to_empty() {
        let action: Action = serde_json::from_value(json!({"name": "get_order"})).expect("action");
        assert!(action.kwargs.is_empty());
        assert!(!action.is_respond());
        assert!(Action::respond("hello").is_respond());
    }

    #[test]
    fn test_env_config_keeps_unknown_fields() {
        let config: EnvConfig = serde_json::from_value(json!({
            "env": "retail",
            "user_strategy": "llm",
            "task_ids": [1],
            "seed": 7
        }))
        .expect("config");
        assert_eq!(config.task_ids, vec![1]);
        assert_eq!(config.extra["seed"], 7);
    }
}
