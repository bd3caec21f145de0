//! CLI command definitions for agent-arena.
//!
//! Every command loads [`Settings`] first (optional YAML file plus
//! `ARENA_*` environment overrides), then applies its own flags on top.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::a2a::{A2aClient, AgentServer};
use crate::config::Settings;
use crate::harness::{run_kickoff, TaskCatalog, TaskConfig, TerminalEvaluatorAgent, TerminalHarness, TrialPlan};
use crate::llm::ChatCompletionsBackend;
use crate::sandbox::{DockerExecutor, PortAllocator, SandboxTarget};
use crate::solver::{SolverAgent, ToolCallLoop};
use crate::tool_server::{ToolServer, ToolServerOptions};

/// Agent evaluation arena: solver and evaluator agents, per-task tool
/// servers and the terminal-task harness.
#[derive(Parser)]
#[command(name = "agent-arena")]
#[command(about = "Evaluate autonomous agents on multi-turn and terminal tasks")]
#[command(version)]
#[command(
    long_about = "agent-arena hosts A2A solver and evaluator agents and runs terminal tasks in sandboxes.\n\nExample usage:\n  agent-arena solver &\n  agent-arena evaluator --tasks tasks.yaml &\n  agent-arena kickoff --task-ids hello-world"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to `logging.level`.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// YAML settings file.
    #[arg(short, long, global = true, env = "ARENA_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Serve the terminal solver agent.
    Solver(SolverArgs),

    /// Serve the terminal evaluator agent.
    #[command(alias = "green")]
    Evaluator(EvaluatorArgs),

    /// Run the terminal harness directly against a solver agent.
    Run(RunArgs),

    /// Health-check both agents and start an evaluation on the evaluator.
    Kickoff(KickoffArgs),

    /// Serve one tool server for a running container until Ctrl-C.
    ToolServer(ToolServerArgs),

    /// Check whether an agent answers its agent card.
    Health(HealthArgs),
}

#[derive(Parser, Debug)]
pub struct SolverArgs {
    /// Port to listen on (overrides `solver.port`).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Model name (overrides `solver.model`).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Maximum reasoning rounds per task (overrides `solver.max_iterations`).
    #[arg(long)]
    pub max_iterations: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct EvaluatorArgs {
    /// Port to listen on (overrides `evaluator.port`).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Task catalog (overrides `evaluation.tasks_file`).
    #[arg(short, long)]
    pub tasks: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Solver agent URL. Defaults to the configured solver endpoint.
    #[arg(long)]
    pub solver_url: Option<String>,

    /// Task catalog (overrides `evaluation.tasks_file`).
    #[arg(short, long)]
    pub tasks: Option<PathBuf>,

    /// Comma-separated task ids; all catalog tasks when omitted.
    #[arg(long, value_delimiter = ',')]
    pub task_ids: Vec<String>,

    #[arg(long)]
    pub n_attempts: Option<usize>,

    #[arg(long)]
    pub n_concurrent_trials: Option<usize>,

    /// Output directory (overrides `evaluation.output_path`).
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Keep containers started from task images.
    #[arg(long)]
    pub keep_containers: bool,

    /// Print the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct KickoffArgs {
    /// Evaluator agent URL. Defaults to the configured evaluator endpoint.
    #[arg(long)]
    pub evaluator_url: Option<String>,

    /// Solver agent URL. Defaults to the configured solver endpoint.
    #[arg(long)]
    pub solver_url: Option<String>,

    /// Comma-separated task ids (overrides `evaluation.task_ids`).
    #[arg(long, value_delimiter = ',')]
    pub task_ids: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ToolServerArgs {
    /// Container that commands run in.
    #[arg(long)]
    pub container: String,

    /// Port to serve on (defaults to `tool_server.base_port`).
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Agent base URL.
    pub url: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    let cli = parse_cli();
    let settings = load_settings(&cli)?;
    run_with_cli(cli, settings).await
}

/// Loads settings for `cli`, honoring `--config`.
pub fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    Settings::load(cli.config.as_deref()).context("Failed to load settings")
}

/// Run the CLI with the parsed arguments and loaded settings.
pub async fn run_with_cli(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    match cli.command {
        Commands::Solver(args) => run_solver_command(args, settings).await,
        Commands::Evaluator(args) => run_evaluator_command(args, settings).await,
        Commands::Run(args) => run_harness_command(args, settings).await,
        Commands::Kickoff(args) => run_kickoff_command(args, settings).await,
        Commands::ToolServer(args) => run_tool_server_command(args, settings).await,
        Commands::Health(args) => run_health_command(args, settings).await,
    }
}

// ============================================================================
// Agent servers
// ============================================================================

async fn run_solver_command(args: SolverArgs, mut settings: Settings) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        settings.solver.port = port;
    }
    if let Some(model) = args.model {
        settings.solver.model = model;
    }
    if let Some(max_iterations) = args.max_iterations {
        settings.solver.max_iterations = max_iterations;
    }

    let backend = ChatCompletionsBackend::from_settings(&settings.solver)?;
    info!(
        model = %backend.model(),
        api_base = %backend.api_base(),
        "Reasoning backend configured"
    );
    let tool_loop = ToolCallLoop::new(Arc::new(backend), settings.solver.max_iterations)
        .with_connect_timeout(settings.tool_server.command_timeout() + Duration::from_secs(30));

    let mut card = SolverAgent::card("terminal_bench_solver");
    card.url = format!("{}/", settings.solver_url());
    let bind = format!("{}:{}", settings.solver.host, settings.solver.port);
    AgentServer::new(card, Arc::new(SolverAgent::new(tool_loop)))
        .serve_until_ctrl_c(&bind)
        .await
        .with_context(|| format!("Solver agent failed on {}", bind))
}

async fn run_evaluator_command(args: EvaluatorArgs, mut settings: Settings) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        settings.evaluator.port = port;
    }
    if let Some(tasks) = args.tasks {
        settings.evaluation.tasks_file = Some(tasks);
    }

    let catalog = load_catalog(&settings)?;
    info!(tasks = catalog.tasks.len(), "Task catalog loaded");
    let harness = TerminalHarness::from_settings(&settings)?;
    let agent = TerminalEvaluatorAgent::new(
        harness,
        catalog,
        TrialPlan::from(&settings.evaluation),
    )
    .with_default_task_ids(settings.evaluation.task_ids.clone());

    let mut card = TerminalEvaluatorAgent::card(&settings.evaluator.name);
    card.url = format!("{}/", settings.evaluator_url());
    let bind = format!("{}:{}", settings.evaluator.host, settings.evaluator.port);
    AgentServer::new(card, Arc::new(agent))
        .serve_until_ctrl_c(&bind)
        .await
        .with_context(|| format!("Evaluator agent failed on {}", bind))
}

// ============================================================================
// Harness
// ============================================================================

async fn run_harness_command(args: RunArgs, mut settings: Settings) -> anyhow::Result<()> {
    if let Some(tasks) = args.tasks {
        settings.evaluation.tasks_file = Some(tasks);
    }
    if !args.task_ids.is_empty() {
        settings.evaluation.task_ids = args.task_ids;
    }
    if let Some(n) = args.n_attempts {
        settings.evaluation.n_attempts = n;
    }
    if let Some(n) = args.n_concurrent_trials {
        settings.evaluation.n_concurrent_trials = n;
    }
    if let Some(output) = args.output {
        settings.evaluation.output_path = output;
    }
    if args.keep_containers {
        settings.evaluation.cleanup = false;
    }
    settings.validate()?;

    let solver_url = args.solver_url.unwrap_or_else(|| settings.solver_url());
    let catalog = load_catalog(&settings)?;
    let tasks = catalog.select(&settings.evaluation.task_ids)?;
    if tasks.is_empty() {
        anyhow::bail!("No tasks to run");
    }

    let harness = TerminalHarness::from_settings(&settings)?;
    let report = harness
        .evaluate(&tasks, &solver_url, TrialPlan::from(&settings.evaluation))
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n=== Terminal Harness Results ===");
        print!("{}", report.summary());
        println!();
        for trial in &report.trials {
            println!(
                "  {} #{} [{}] {} {:.1}s",
                trial.task_id,
                trial.attempt,
                if trial.resolved { "resolved" } else { "unresolved" },
                trial.failure_mode.as_str(),
                trial.duration_secs,
            );
            if let Some(err) = &trial.error {
                println!("    error: {err}");
            }
        }
        println!(
            "\nResults written to {}",
            harness.output_dir().join("results.json").display()
        );
    }
    Ok(())
}

async fn run_kickoff_command(args: KickoffArgs, settings: Settings) -> anyhow::Result<()> {
    let evaluator_url = args.evaluator_url.unwrap_or_else(|| settings.evaluator_url());
    let solver_url = args.solver_url.unwrap_or_else(|| settings.solver_url());
    let task_ids = if args.task_ids.is_empty() {
        settings.evaluation.task_ids.clone()
    } else {
        args.task_ids
    };
    let config = TaskConfig {
        task_ids,
        white_agent_url: solver_url.clone(),
        n_attempts: Some(settings.evaluation.n_attempts),
        n_concurrent_trials: Some(settings.evaluation.n_concurrent_trials),
    };

    // The evaluator replies only after every trial has finished.
    let client = A2aClient::new(
        Duration::from_secs(24 * 60 * 60),
        settings.a2a.health_check_timeout(),
    )?;

    let rule = "=".repeat(80);
    println!("{rule}\nTerminal-Bench Evaluation Kickoff\n{rule}\n\nChecking agents...\n");

    let outcome = run_kickoff(&client, &evaluator_url, &config).await;
    print_health("Evaluator agent", &evaluator_url, outcome.evaluator_healthy);
    print_health("Solver agent", &solver_url, outcome.solver_healthy);

    let Some(response) = outcome.response else {
        if !outcome.evaluator_healthy {
            println!("\nStart the evaluator agent: agent-arena evaluator");
        }
        if !outcome.solver_healthy {
            println!("\nStart the solver agent: agent-arena solver");
        }
        anyhow::bail!("Agents are not running");
    };

    println!(
        "\nConfig: {} tasks, {} attempts, {} concurrent\n",
        config.task_ids.len(),
        settings.evaluation.n_attempts,
        settings.evaluation.n_concurrent_trials
    );
    println!("{rule}\nEVALUATOR RESPONSE:\n{rule}\n{response}");
    Ok(())
}

fn print_health(name: &str, url: &str, healthy: bool) {
    if healthy {
        println!("✓ {name} running at {url}");
    } else {
        println!("✗ {name} NOT running at {url}");
    }
}

// ============================================================================
// Debugging helpers
// ============================================================================

async fn run_tool_server_command(args: ToolServerArgs, mut settings: Settings) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        settings.tool_server.base_port = port;
    }
    let ports = PortAllocator::new(settings.tool_server.base_port);
    let executor = DockerExecutor::new(
        settings.tool_server.working_dir.clone(),
        settings.tool_server.command_timeout(),
    );

    let mut server = ToolServer::new(
        ports.lease(format!("manual:{}", args.container)),
        SandboxTarget::new(args.container),
        Arc::new(executor),
        ToolServerOptions::from(&settings.tool_server),
    );
    server.start();
    if let Err(e) = server.wait_until_ready().await {
        server.shutdown().await;
        return Err(e).context("Tool server did not become ready");
    }

    println!("Tool Server URL: {}", server.url());
    println!("Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}

async fn run_health_command(args: HealthArgs, settings: Settings) -> anyhow::Result<()> {
    let client = A2aClient::new(settings.a2a.message_timeout(), settings.a2a.health_check_timeout())?;
    match client.get_agent_card(&args.url).await {
        Ok(card) => {
            println!("✓ {} running at {}", card.name, args.url);
            println!("{}", serde_json::to_string_pretty(&card)?);
            Ok(())
        }
        Err(e) => {
            println!("✗ Agent NOT running at {}", args.url);
            Err(e.into())
        }
    }
}

fn load_catalog(settings: &Settings) -> anyhow::Result<TaskCatalog> {
    let path = settings
        .evaluation
        .tasks_file
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("No task catalog: set evaluation.tasks_file or pass --tasks"))?;
    TaskCatalog::load(path)
}
