//! agent-arena CLI entry point.
//!
//! Initializes logging and metrics, then delegates to the CLI module.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level and the settings file
    let cli = agent_arena::cli::parse_cli();
    let settings = agent_arena::cli::load_settings(&cli)?;

    // Priority: RUST_LOG env var > --log-level CLI arg > logging.level setting
    let log_filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| cli.log_level.clone())
        .unwrap_or_else(|| settings.logging.level.clone());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    agent_arena::metrics::init_metrics()?;

    agent_arena::cli::run_with_cli(cli, settings).await
}
