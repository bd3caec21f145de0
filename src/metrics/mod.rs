//! Prometheus metrics for agent-arena.
//!
//! Tool servers, solvers and evaluators record into one process-wide registry;
//! every A2A agent server exposes it on `GET /metrics`.
//!
//! # Example
//!
//! ```ignore
//! use agent_arena::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_tool_call("execute_bash_command", "ok", 0.42);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    COMMAND_DURATION, LLM_REQUESTS_TOTAL, REGISTRY, TASKS_TOTAL, TOOL_CALLS_TOTAL, TURNS_TOTAL,
};
