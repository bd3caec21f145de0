//! Sandboxed command execution.
//!
//! - [`PortAllocator`]: monotonic port issuance for per-task tool servers
//! - [`CommandExecutor`]: run one shell command in a [`SandboxTarget`]
//! - [`SandboxContainer`]: an ephemeral Docker container owned by one task

mod container;
mod executor;
mod port;

pub use container::SandboxContainer;
pub use executor::{CommandExecutor, CommandResult, DockerExecutor, LocalExecutor, SandboxTarget};
pub use port::{PortAllocator, PortLease};

/// Truncate `s` to at most `max` bytes on a char boundary, marking the cut.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
