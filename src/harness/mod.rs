//! Terminal-task harness.
//!
//! For each task in the catalog the harness provisions a sandbox, starts a
//! per-task [`crate::tool_server::ToolServer`] on a port from the shared
//! [`PortAllocator`], hands the solver the server URL, verifies the sandbox
//! afterwards and tears everything down. Trials run concurrently up to
//! `n_concurrent_trials`; the outcome is an [`EvaluationReport`].

pub mod catalog;
pub mod evaluator;
pub mod kickoff;
pub mod report;
pub mod runner;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use futures::FutureExt;

pub use catalog::{SandboxSource, TaskCatalog, TerminalTask};
pub use evaluator::{TaskConfig, TerminalEvaluatorAgent};
pub use kickoff::{kickoff_message, run_kickoff, KickoffOutcome};
pub use report::{EvaluationReport, DEFAULT_DIFFICULTY};
pub use runner::{
    classify_response, format_task_message, interaction_log_path, FailureMode, TerminalTaskRunner, TrialResult,
};

use crate::a2a::A2aClient;
use crate::config::{EvaluationSettings, ScoringSettings, Settings};
use crate::sandbox::{DockerExecutor, PortAllocator};
use crate::tool_server::ToolServerOptions;

/// How many trials to run and how many at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialPlan {
    pub n_attempts: usize,
    pub n_concurrent_trials: usize,
}

impl From<&EvaluationSettings> for TrialPlan {
    fn from(settings: &EvaluationSettings) -> Self {
        Self {
            n_attempts: settings.n_attempts,
            n_concurrent_trials: settings.n_concurrent_trials,
        }
    }
}

pub struct TerminalHarness {
    runner: Arc<TerminalTaskRunner>,
    scoring: ScoringSettings,
}

impl TerminalHarness {
    pub fn new(runner: TerminalTaskRunner, scoring: ScoringSettings) -> Self {
        Self {
            runner: Arc::new(runner),
            scoring,
        }
    }

    /// Docker-backed harness configured from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let executor = DockerExecutor::new(
            settings.tool_server.working_dir.clone(),
            settings.tool_server.command_timeout(),
        );
        let client = A2aClient::new(
            settings.scaled_message_timeout(),
            settings.a2a.health_check_timeout(),
        )?;
        let runner = TerminalTaskRunner::new(
            Arc::new(executor),
            Arc::new(PortAllocator::new(settings.tool_server.base_port)),
            client,
            ToolServerOptions::from(&settings.tool_server),
            settings.evaluation.output_path.clone(),
        )
        .with_cleanup(settings.evaluation.cleanup);

        Ok(Self::new(runner, settings.scoring.clone()))
    }

    pub fn output_dir(&self) -> &Path {
        self.runner.output_dir()
    }

    /// Runs every attempt of every task and aggregates the results.
    pub async fn run(&self, tasks: &[TerminalTask], solver_url: &str, plan: TrialPlan) -> EvaluationReport {
        let concurrency = plan.n_concurrent_trials.max(1);
        tracing::info!(
            tasks = tasks.len(),
            attempts = plan.n_attempts,
            concurrency,
            solver = %solver_url,
            "Starting terminal evaluation"
        );

        // Trial futures own their inputs so the evaluation future stays `Send`.
        let trials: Vec<TrialResult> = stream::iter(
            tasks
                .iter()
                .map(|task| Arc::new(task.clone()))
                .flat_map(|task| (0..plan.n_attempts).map(move |attempt| (Arc::clone(&task), attempt)))
                .collect::<Vec<_>>(),
        )
        .map(|(task, attempt)| {
            let runner = Arc::clone(&self.runner);
            let solver_url = solver_url.to_string();
            async move { runner.run_task(&task, attempt, &solver_url).await }.boxed()
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

        EvaluationReport::from_trials(solver_url, trials, &self.scoring)
    }

    /// [`Self::run`] followed by writing `results.json` to the output directory.
    pub async fn evaluate(
        &self,
        tasks: &[TerminalTask],
        solver_url: &str,
        plan: TrialPlan,
    ) -> Result<EvaluationReport> {
        let report = self.run(tasks, solver_url, plan).await;
        report.write_json(self.output_dir())?;
        tracing::info!(
            trials = report.n_trials,
            resolved = report.n_resolved,
            accuracy = report.accuracy,
            "Terminal evaluation finished"
        );
        Ok(report)
    }
}
