//! Solver side: the tool-calling loop and the agent that hosts it.

pub mod agent;
pub mod tool_loop;

pub use agent::{extract_tool_server_url, SolverAgent};
pub use tool_loop::{
    format_tool_result, SolveError, ToolCallLoop, COMPLETED_TEXT, ITERATION_LIMIT_TEXT,
    SOLVER_SYSTEM_PROMPT,
};
