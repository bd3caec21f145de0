//! Tau-style evaluator agent: plays one environment task against a solver
//! named in the incoming request.
//!
//! The crate ships no concrete tau environment, so no CLI subcommand hosts
//! this agent. Embedders supply an [`EnvironmentFactory`] and serve it with
//! [`crate::a2a::AgentServer`], as `tests/conversation_driver.rs` does.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use super::conversation::{A2aSolverChannel, ConversationDriver};
use super::environment::{EnvConfig, EnvironmentFactory};
use super::tags::parse_tags;
use crate::a2a::{A2aClient, AgentExecutor, AgentReply, AgentRequest};
use crate::metrics::MetricsCollector;

pub struct TauEvaluatorAgent<F> {
    factory: F,
    client: A2aClient,
    max_turns: usize,
    metrics: MetricsCollector,
}

impl<F: EnvironmentFactory> TauEvaluatorAgent<F> {
    pub fn new(factory: F, client: A2aClient, max_turns: usize) -> Self {
        Self {
            factory,
            client,
            max_turns,
            metrics: MetricsCollector::new(),
        }
    }

    async fn evaluate(&self, text: &str) -> anyhow::Result<String> {
        let tags = parse_tags(text);
        let solver_url = tags
            .get("white_agent_url")
            .ok_or_else(|| anyhow::anyhow!("missing <white_agent_url> in request"))?;
        let config_text = tags
            .get("env_config")
            .ok_or_else(|| anyhow::anyhow!("missing <env_config> in request"))?;
        let config: EnvConfig = serde_json::from_str(config_text)?;

        let &[task_index] = config.task_ids.as_slice() else {
            anyhow::bail!(
                "exactly one task id is supported, got {}",
                config.task_ids.len()
            );
        };

        tracing::info!(env = %config.env, task_index, solver = %solver_url, "Starting evaluation");
        let mut env = self.factory.create(&config, task_index)?;
        let driver = ConversationDriver::new(
            A2aSolverChannel::new(self.client.clone(), solver_url.clone()),
            self.max_turns,
        );

        let started = Instant::now();
        let outcome = driver.evaluate(env.as_mut(), task_index).await;
        let success = outcome.reward == 1.0;
        self.metrics
            .record_task(if success { "resolved" } else { "unresolved" });

        let mut metrics = json!({
            "time_used": started.elapsed().as_secs_f64(),
            "success": success,
        });
        if let Some(error) = outcome.error() {
            metrics["error"] = json!(error);
        }

        let emoji = if success { "✅" } else { "❌" };
        tracing::info!(task_index, success, "Evaluation complete");
        Ok(format!(
            "Finished. White agent success: {}\nMetrics: {}",
            emoji, metrics
        ))
    }
}

#[async_trait]
impl<F: EnvironmentFactory> AgentExecutor for TauEvaluatorAgent<F> {
    async fn execute(&self, request: AgentRequest) -> AgentReply {
        match self.evaluate(&request.text).await {
            Ok(text) => AgentReply::completed(text),
            Err(e) => {
                tracing::error!(error = %e, "Evaluation request rejected");
                AgentReply::failed(format!("Error: {}", e))
            }
        }
    }
}
