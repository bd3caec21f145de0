//! Configuration for agent-arena.
//!
//! [`Settings`] is a plain value object built once at startup and handed to
//! every component that needs it. Values come from, in increasing priority:
//! built-in defaults, an optional YAML file, and `ARENA_*` environment
//! variables.
//!
//! # Environment Variables
//!
//! Every leaf key `section.key` can be overridden by `ARENA_SECTION_KEY`,
//! e.g. `ARENA_SOLVER_PORT=9102` or `ARENA_EVALUATION_TASK_IDS=hello,fix-git`.
//! List values accept comma-separated strings; map values accept inline YAML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

/// Prefix for all environment overrides.
pub const ENV_PREFIX: &str = "ARENA";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    MissingFile(PathBuf),

    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A value has the wrong shape for its key.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The YAML could not be parsed into settings.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Evaluator (task-issuing) agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9001,
            name: "terminal_bench_evaluator".to_string(),
        }
    }
}

/// Solver agent endpoint and reasoning backend options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub host: String,
    pub port: u16,
    pub model: String,
    pub max_iterations: usize,
    /// Base URL of an OpenAI-compatible API. `None` uses `OPENAI_API_BASE` or api.openai.com.
    pub api_base: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9002,
            model: "gpt-4o-mini".to_string(),
            max_iterations: 10,
            api_base: None,
            request_timeout_secs: 120,
        }
    }
}

/// Per-task tool server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerSettings {
    /// First port handed out by the port allocator.
    pub base_port: u16,
    /// Interface the tool server listens on.
    pub bind_host: String,
    /// Host name placed in the URL given to the solver.
    pub public_host: String,
    /// Working directory for commands inside the sandbox.
    pub working_dir: String,
    pub command_timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub ready_poll_interval_ms: u64,
    pub ready_max_attempts: u32,
    /// Extra wait after the first successful probe.
    pub settle_delay_ms: u64,
    pub join_timeout_secs: u64,
}

impl Default for ToolServerSettings {
    fn default() -> Self {
        Self {
            base_port: 10_000,
            bind_host: "0.0.0.0".to_string(),
            public_host: "localhost".to_string(),
            working_dir: "/app".to_string(),
            command_timeout_secs: 300,
            probe_timeout_ms: 1_000,
            ready_poll_interval_ms: 500,
            ready_max_attempts: 20,
            settle_delay_ms: 1_000,
            join_timeout_secs: 5,
        }
    }
}

impl ToolServerSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

/// Evaluation run options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    /// YAML task catalog for terminal tasks.
    pub tasks_file: Option<PathBuf>,
    pub output_path: PathBuf,
    /// Task ids to run; empty runs the whole catalog.
    pub task_ids: Vec<String>,
    pub n_attempts: usize,
    pub n_concurrent_trials: usize,
    /// Scales every solver-facing timeout.
    pub timeout_multiplier: f64,
    pub max_turns: usize,
    /// Remove containers the harness started itself.
    pub cleanup: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            tasks_file: None,
            output_path: PathBuf::from("./results"),
            task_ids: Vec::new(),
            n_attempts: 1,
            n_concurrent_trials: 1,
            timeout_multiplier: 1.0,
            max_turns: 30,
            cleanup: true,
        }
    }
}

/// Messaging protocol timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct A2aSettings {
    pub message_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
}

impl Default for A2aSettings {
    fn default() -> Self {
        Self {
            message_timeout_secs: 300,
            health_check_timeout_secs: 5,
        }
    }
}

impl A2aSettings {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

/// Difficulty weighting for the terminal report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub difficulty_weights: BTreeMap<String, f64>,
    /// Overrides the difficulty declared in the task catalog.
    pub task_difficulty_map: BTreeMap<String, String>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        let difficulty_weights = [("easy", 1.0), ("medium", 2.0), ("hard", 3.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            difficulty_weights,
            task_difficulty_map: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// All agent-arena settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub evaluator: EvaluatorSettings,
    pub solver: SolverSettings,
    pub tool_server: ToolServerSettings,
    pub evaluation: EvaluationSettings,
    pub a2a: A2aSettings,
    pub scoring: ScoringSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Loads settings from an optional YAML file plus process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingFile` if `path` is given but does not exist,
    /// or any parse/validation error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses a YAML settings file. Missing sections and keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `ARENA_SECTION_KEY` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut tree = serde_yaml::to_value(&*self)?;
        let mut touched = false;

        if let Value::Mapping(sections) = &mut tree {
            for (section_key, section) in sections.iter_mut() {
                let (Some(section_name), Value::Mapping(fields)) = (section_key.as_str(), section)
                else {
                    continue;
                };
                for (field_key, field) in fields.iter_mut() {
                    let Some(field_name) = field_key.as_str() else {
                        continue;
                    };
                    let env_key = env_key(section_name, field_name);
                    if let Some(raw) = lookup(&env_key) {
                        *field = override_value(field, &raw, &env_key)?;
                        touched = true;
                        tracing::debug!(key = %env_key, "Applied environment override");
                    }
                }
            }
        }

        if touched {
            *self = serde_yaml::from_value(tree)?;
        }
        Ok(())
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &str); 12] = [
            (self.evaluator.port == 0, "evaluator.port must be greater than 0"),
            (self.solver.port == 0, "solver.port must be greater than 0"),
            (
                self.solver.max_iterations == 0,
                "solver.max_iterations must be greater than 0",
            ),
            (
                self.solver.request_timeout_secs == 0,
                "solver.request_timeout_secs must be greater than 0",
            ),
            (
                self.tool_server.base_port == 0,
                "tool_server.base_port must be greater than 0",
            ),
            (
                self.tool_server.command_timeout_secs == 0,
                "tool_server.command_timeout_secs must be greater than 0",
            ),
            (
                self.tool_server.ready_max_attempts == 0,
                "tool_server.ready_max_attempts must be greater than 0",
            ),
            (
                self.evaluation.n_attempts == 0,
                "evaluation.n_attempts must be greater than 0",
            ),
            (
                self.evaluation.n_concurrent_trials == 0,
                "evaluation.n_concurrent_trials must be greater than 0",
            ),
            (
                self.evaluation.max_turns == 0,
                "evaluation.max_turns must be greater than 0",
            ),
            (
                self.evaluation.timeout_multiplier <= 0.0,
                "evaluation.timeout_multiplier must be positive",
            ),
            (
                self.a2a.message_timeout_secs == 0 || self.a2a.health_check_timeout_secs == 0,
                "a2a timeouts must be greater than 0",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::ValidationFailed(message.to_string())),
            None => Ok(()),
        }
    }

    pub fn evaluator_url(&self) -> String {
        format!("http://{}:{}", self.evaluator.host, self.evaluator.port)
    }

    pub fn solver_url(&self) -> String {
        format!("http://{}:{}", self.solver.host, self.solver.port)
    }

    /// Solver message timeout scaled by `evaluation.timeout_multiplier`.
    pub fn scaled_message_timeout(&self) -> Duration {
        self.a2a
            .message_timeout()
            .mul_f64(self.evaluation.timeout_multiplier)
    }
}

/// Reads `OPENAI_API_KEY`, required only by the solver agent.
pub fn openai_api_key() -> Result<String, ConfigError> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
}

fn env_key(section: &str, field: &str) -> String {
    format!("{}_{}_{}", ENV_PREFIX, section, field)
        .replace('.', "_")
        .to_uppercase()
}

fn override_value(current: &Value, raw: &str, key: &str) -> Result<Value, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };

    match current {
        Value::String(_) | Value::Null => Ok(Value::String(raw.to_string())),
        Value::Sequence(_) => Ok(Value::Sequence(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        )),
        Value::Mapping(_) => {
            let parsed: Value = serde_yaml::from_str(raw).map_err(|e| invalid(e.to_string()))?;
            if parsed.is_mapping() {
                Ok(parsed)
            } else {
                Err(invalid(format!("expected a mapping, got '{}'", raw)))
            }
        }
        Value::Number(_) => {
            let parsed: Value = serde_yaml::from_str(raw).map_err(|e| invalid(e.to_string()))?;
            if parsed.is_number() {
                Ok(parsed)
            } else {
                Err(invalid(format!("expected a number, got '{}'", raw)))
            }
        }
        Value::Bool(_) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            other => Err(invalid(format!("expected a boolean, got '{}'", other))),
        },
        Value::Tagged(_) => Err(invalid("tagged values cannot be overridden".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tool_server.base_port, 10_000);
        assert_eq!(settings.tool_server.ready_max_attempts, 20);
        assert_eq!(settings.solver_url(), "http://localhost:9002");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings = Settings::from_yaml_str(
            "solver:\n  port: 9102\nevaluation:\n  task_ids: [hello-world]\n",
        )
        .expect("yaml should parse");

        assert_eq!(settings.solver.port, 9102);
        assert_eq!(settings.solver.host, "localhost");
        assert_eq!(settings.evaluation.task_ids, vec!["hello-world"]);
        assert_eq!(settings.evaluation.max_turns, 30);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = Settings::load(Some(Path::new("/definitely/not/here.yaml")));
        assert!(matches!(result, Err(ConfigError::MissingFile(_))));
    }

    #[test]
    fn test_env_overrides_by_dotted_key() {
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(lookup_from(&[
                ("ARENA_SOLVER_PORT", "9500"),
                ("ARENA_SOLVER_MODEL", "gpt-4o"),
                ("ARENA_EVALUATION_TASK_IDS", "hello-world, fix-git ,"),
                ("ARENA_EVALUATION_CLEANUP", "false"),
                ("ARENA_EVALUATION_TASKS_FILE", "/tmp/tasks.yaml"),
                ("ARENA_SCORING_DIFFICULTY_WEIGHTS", "{easy: 1.5}"),
            ]))
            .expect("overrides should apply");

        assert_eq!(settings.solver.port, 9500);
        assert_eq!(settings.solver.model, "gpt-4o");
        assert_eq!(settings.evaluation.task_ids, vec!["hello-world", "fix-git"]);
        assert!(!settings.evaluation.cleanup);
        assert_eq!(
            settings.evaluation.tasks_file,
            Some(PathBuf::from("/tmp/tasks.yaml"))
        );
        assert_eq!(settings.scoring.difficulty_weights.get("easy"), Some(&1.5));
    }

    #[test]
    fn test_env_override_rejects_wrong_type() {
        let mut settings = Settings::default();
        let result = settings.apply_env_overrides(lookup_from(&[("ARENA_SOLVER_PORT", "abc")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_turns() {
        let mut settings = Settings::default();
        settings.evaluation.max_turns = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("max_turns"));
    }

    #[test]
    fn test_scaled_message_timeout() {
        let mut settings = Settings::default();
        settings.a2a.message_timeout_secs = 100;
        settings.evaluation.timeout_multiplier = 1.5;
        assert_eq!(settings.scaled_message_timeout(), Duration::from_secs(150));
    }
}
