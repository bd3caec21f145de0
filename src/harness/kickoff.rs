//! Starts a terminal evaluation on a running evaluator agent.

use super::evaluator::{TaskConfig, TASK_CONFIG_TAG};
use crate::a2a::A2aClient;

/// Kickoff request text: the solver URL, the JSON task config block and the
/// reporting request.
pub fn kickoff_message(config: &TaskConfig) -> String {
    let json = serde_json::to_string_pretty(config).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Launch terminal-bench evaluation for agent at {url}.\n\
         \n\
         Configuration:\n\
         <{tag}>\n\
         {json}\n\
         </{tag}>\n\
         \n\
         Report results including tasks attempted, resolved, accuracy, and failure modes.",
        url = config.white_agent_url,
        tag = TASK_CONFIG_TAG,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct KickoffOutcome {
    pub evaluator_healthy: bool,
    pub solver_healthy: bool,
    /// Evaluator reply; `None` when a health check failed and nothing was sent.
    pub response: Option<String>,
}

impl KickoffOutcome {
    pub fn launched(&self) -> bool {
        self.response.is_some()
    }
}

/// Health-checks both agents and, if both answer, sends the kickoff message
/// to the evaluator and waits for its report.
pub async fn run_kickoff(client: &A2aClient, evaluator_url: &str, config: &TaskConfig) -> KickoffOutcome {
    let evaluator_healthy = client.check_health(evaluator_url).await;
    let solver_healthy = client.check_health(&config.white_agent_url).await;

    let mut outcome = KickoffOutcome {
        evaluator_healthy,
        solver_healthy,
        response: None,
    };
    if !(evaluator_healthy && solver_healthy) {
        tracing::warn!(evaluator_healthy, solver_healthy, "Kickoff aborted");
        return outcome;
    }

    tracing::info!(
        evaluator = %evaluator_url,
        solver = %config.white_agent_url,
        tasks = config.task_ids.len(),
        "Launching evaluation"
    );
    outcome.response = Some(client.send_text(evaluator_url, &kickoff_message(config)).await);
    outcome
}
