//! Aggregated results of one terminal evaluation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::runner::{FailureMode, TrialResult};
use crate::config::ScoringSettings;

/// Difficulty used when neither the scoring map nor the catalog names one.
pub const DEFAULT_DIFFICULTY: &str = "medium";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub solver_url: String,
    pub generated_at: DateTime<Utc>,
    pub n_trials: usize,
    pub n_resolved: usize,
    pub n_unresolved: usize,
    /// Resolved trials over all trials; 0 when nothing ran.
    pub accuracy: f64,
    /// Difficulty-weighted share of resolved trials.
    pub weighted_score: f64,
    pub resolved_ids: Vec<String>,
    pub unresolved_ids: Vec<String>,
    pub failure_modes: BTreeMap<FailureMode, usize>,
    pub trials: Vec<TrialResult>,
}

impl EvaluationReport {
    pub fn from_trials(
        solver_url: impl Into<String>,
        mut trials: Vec<TrialResult>,
        scoring: &ScoringSettings,
    ) -> Self {
        trials.sort_by(|a, b| a.task_id.cmp(&b.task_id).then(a.attempt.cmp(&b.attempt)));

        let n_trials = trials.len();
        let n_resolved = trials.iter().filter(|t| t.resolved).count();

        let mut failure_modes = BTreeMap::new();
        let mut resolved_ids = Vec::new();
        let mut unresolved_ids = Vec::new();
        let mut total_weight = 0.0;
        let mut resolved_weight = 0.0;

        for trial in &trials {
            *failure_modes.entry(trial.failure_mode).or_insert(0) += 1;

            let weight = difficulty_weight(trial, scoring);
            total_weight += weight;
            if trial.resolved {
                resolved_weight += weight;
                push_unique(&mut resolved_ids, &trial.task_id);
            } else {
                push_unique(&mut unresolved_ids, &trial.task_id);
            }
        }

        let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };

        Self {
            solver_url: solver_url.into(),
            generated_at: Utc::now(),
            n_trials,
            n_resolved,
            n_unresolved: n_trials - n_resolved,
            accuracy: ratio(n_resolved as f64, n_trials as f64),
            weighted_score: ratio(resolved_weight, total_weight),
            resolved_ids,
            unresolved_ids,
            failure_modes,
            trials,
        }
    }

    /// Writes `results.json` under `dir`, creating it if needed.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let path = dir.join("results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "Evaluation report written");
        Ok(path)
    }

    /// Human-readable report used as the evaluator's reply.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Terminal-Bench evaluation of {}\n\
             Trials: {}\n\
             Resolved: {}\n\
             Unresolved: {}\n\
             Accuracy: {:.2}%\n\
             Weighted score: {:.2}%\n",
            self.solver_url,
            self.n_trials,
            self.n_resolved,
            self.n_unresolved,
            self.accuracy * 100.0,
            self.weighted_score * 100.0,
        );

        if !self.resolved_ids.is_empty() {
            out.push_str(&format!("Resolved tasks: {}\n", self.resolved_ids.join(", ")));
        }
        if !self.unresolved_ids.is_empty() {
            out.push_str(&format!("Unresolved tasks: {}\n", self.unresolved_ids.join(", ")));
        }

        out.push_str("Failure modes:\n");
        for (mode, count) in &self.failure_modes {
            out.push_str(&format!("  {}: {}\n", mode.as_str(), count));
        }
        out
    }
}

fn difficulty_weight(trial: &TrialResult, scoring: &ScoringSettings) -> f64 {
    let difficulty = scoring
        .task_difficulty_map
        .get(&trial.task_id)
        .map(String::as_str)
        .or(trial.difficulty.as_deref())
        .unwrap_or(DEFAULT_DIFFICULTY);
    scoring
        .difficulty_weights
        .get(difficulty)
        .copied()
        .unwrap_or(1.0)
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}
