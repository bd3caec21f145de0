//! Command-line interface for agent-arena.
//!
//! Provides commands to serve the solver and evaluator agents, run the
//! terminal harness, kick off evaluations and debug single tool servers.

mod commands;

pub use commands::{load_settings, parse_cli, run, run_with_cli, Cli, Commands};
