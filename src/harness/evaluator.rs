//! Terminal evaluator agent: runs the harness for the solver named in a
//! kickoff request and replies with the report summary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::catalog::TaskCatalog;
use super::{TerminalHarness, TrialPlan};
use crate::a2a::{AgentCard, AgentExecutor, AgentReply, AgentRequest, AgentSkill};
use crate::driver::tags::parse_tags;

/// Tag carrying the JSON [`TaskConfig`] in a kickoff message.
pub const TASK_CONFIG_TAG: &str = "task_config";

/// Evaluation request sent by kickoff. Unset fields fall back to settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub task_ids: Vec<String>,
    pub white_agent_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_attempts: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_concurrent_trials: Option<usize>,
}

impl TaskConfig {
    /// Reads the `<task_config>` block of `text`.
    pub fn from_message(text: &str) -> anyhow::Result<Self> {
        let tags = parse_tags(text);
        let block = tags
            .get(TASK_CONFIG_TAG)
            .ok_or_else(|| anyhow::anyhow!("missing <{}> in request", TASK_CONFIG_TAG))?;
        let config: Self = serde_json::from_str(block)
            .map_err(|e| anyhow::anyhow!("invalid <{}>: {}", TASK_CONFIG_TAG, e))?;
        if config.white_agent_url.trim().is_empty() {
            anyhow::bail!("white_agent_url must not be empty");
        }
        Ok(config)
    }

    fn plan(&self, defaults: TrialPlan) -> TrialPlan {
        TrialPlan {
            n_attempts: self.n_attempts.unwrap_or(defaults.n_attempts),
            n_concurrent_trials: self
                .n_concurrent_trials
                .unwrap_or(defaults.n_concurrent_trials),
        }
    }
}

pub struct TerminalEvaluatorAgent {
    harness: TerminalHarness,
    catalog: TaskCatalog,
    defaults: TrialPlan,
    default_task_ids: Vec<String>,
}

impl TerminalEvaluatorAgent {
    pub fn new(harness: TerminalHarness, catalog: TaskCatalog, defaults: TrialPlan) -> Self {
        Self {
            harness,
            catalog,
            defaults,
            default_task_ids: Vec::new(),
        }
    }

    /// Task ids used when a request names none.
    pub fn with_default_task_ids(mut self, ids: Vec<String>) -> Self {
        self.default_task_ids = ids;
        self
    }

    pub fn card(name: &str) -> AgentCard {
        AgentCard::text_agent(
            name,
            "Terminal-Bench evaluator: runs shell tasks against a solver agent",
            AgentSkill {
                id: "terminal_bench_evaluation".to_string(),
                name: "Terminal-Bench evaluation".to_string(),
                description: "Evaluates a solver agent on sandboxed terminal tasks".to_string(),
                tags: vec!["evaluation".to_string(), "terminal".to_string()],
                examples: vec![kickoff_example()],
            },
        )
    }

    async fn evaluate(&self, text: &str) -> anyhow::Result<String> {
        let config = TaskConfig::from_message(text)?;
        let ids = if config.task_ids.is_empty() {
            &self.default_task_ids
        } else {
            &config.task_ids
        };
        let tasks = self.catalog.select(ids)?;
        if tasks.is_empty() {
            anyhow::bail!("no tasks to run");
        }

        let report = self
            .harness
            .evaluate(&tasks, &config.white_agent_url, config.plan(self.defaults))
            .await?;
        Ok(report.summary())
    }
}

#[async_trait]
impl AgentExecutor for TerminalEvaluatorAgent {
    async fn execute(&self, request: AgentRequest) -> AgentReply {
        match self.evaluate(&request.text).await {
            Ok(summary) => AgentReply::completed(summary),
            Err(e) => {
                tracing::error!(error = %e, "Evaluation request rejected");
                AgentReply::failed(format!("Error: {}", e))
            }
        }
    }
}

fn kickoff_example() -> String {
    let config = TaskConfig {
        task_ids: vec!["hello-world".to_string()],
        white_agent_url: "http://localhost:9002".to_string(),
        n_attempts: Some(1),
        n_concurrent_trials: Some(1),
    };
    super::kickoff::kickoff_message(&config)
}
