//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`super::init_metrics`] has run, so library
//! users that never initialize metrics pay nothing.

use super::prometheus::{
    COMMAND_DURATION, LLM_REQUESTS_TOTAL, TASKS_TOTAL, TOOL_CALLS_TOTAL, TURNS_TOTAL,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one served tool invocation and, for commands, its duration.
    pub fn record_tool_call(&self, tool: &str, status: &str, duration_secs: f64) {
        if let Some(counter) = TOOL_CALLS_TOTAL.get() {
            counter.with_label_values(&[tool, status]).inc();
        }
        if let Some(histogram) = COMMAND_DURATION.get() {
            histogram.observe(duration_secs);
        }
    }

    pub fn record_turn(&self) {
        if let Some(counter) = TURNS_TOTAL.get() {
            counter.inc();
        }
    }

    /// Record a finished trial (`status` is e.g. "resolved", "unresolved", "error").
    pub fn record_task(&self, status: &str) {
        if let Some(counter) = TASKS_TOTAL.get() {
            counter.with_label_values(&[status]).inc();
        }
    }

    pub fn record_llm_request(&self, success: bool) {
        if let Some(counter) = LLM_REQUESTS_TOTAL.get() {
            let status = if success { "success" } else { "error" };
            counter.with_label_values(&[status]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_collector_records_labels() {
        init_metrics().expect("metrics should initialize");
        let collector = MetricsCollector::new();
        collector.record_tool_call("execute_bash_command", "ok", 0.2);
        collector.record_task("resolved");
        collector.record_llm_request(false);

        let text = export_metrics();
        assert!(text.contains("tool=\"execute_bash_command\""));
        assert!(text.contains("status=\"resolved\""));
    }
}
