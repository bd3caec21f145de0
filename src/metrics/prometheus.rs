//! Prometheus metrics registration and export.

use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all agent-arena metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Tool invocations served by tool servers, labeled by tool and status.
pub static TOOL_CALLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall time of sandbox commands in seconds.
pub static COMMAND_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Conversation turns sent by the evaluator.
pub static TURNS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Evaluated trials, labeled by outcome.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Reasoning backend requests, labeled by status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is invalid.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let tool_calls_total = CounterVec::new(
        Opts::new("arena_tool_calls_total", "Tool invocations served"),
        &["tool", "status"],
    )?;

    let command_duration = Histogram::with_opts(
        HistogramOpts::new(
            "arena_command_duration_seconds",
            "Sandbox command duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
    )?;

    let turns_total = Counter::new("arena_turns_total", "Conversation turns sent to solvers")?;

    let tasks_total = CounterVec::new(
        Opts::new("arena_tasks_total", "Evaluated trials"),
        &["status"],
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("arena_llm_requests_total", "Reasoning backend requests"),
        &["status"],
    )?;

    registry.register(Box::new(tool_calls_total.clone()))?;
    registry.register(Box::new(command_duration.clone()))?;
    registry.register(Box::new(turns_total.clone()))?;
    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;

    // Losing a race here only means another caller initialized first
    let _ = REGISTRY.set(registry);
    let _ = TOOL_CALLS_TOTAL.set(tool_calls_total);
    let _ = COMMAND_DURATION.set(command_duration);
    let _ = TURNS_TOTAL.set(turns_total);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// axum handler for `GET /metrics`.
pub async fn metrics_handler() -> String {
    export_metrics()
}
