//! Ephemeral Docker container for tasks that ship an image instead of a
//! running sandbox.

use std::process::Stdio;

use anyhow::Result;
use tokio::process::Command;

use super::executor::SandboxTarget;

/// A container started by the harness and removed when the task ends.
pub struct SandboxContainer {
    name: String,
    docker_binary: String,
    removed: bool,
}

impl SandboxContainer {
    /// Starts `image` detached as `name`, idling for `lifetime_secs`.
    ///
    /// A stale container with the same name is removed first.
    pub async fn start(
        image: &str,
        name: &str,
        working_dir: &str,
        lifetime_secs: u64,
    ) -> Result<Self> {
        Self::start_with_binary("docker", image, name, working_dir, lifetime_secs).await
    }

    pub async fn start_with_binary(
        docker_binary: &str,
        image: &str,
        name: &str,
        working_dir: &str,
        lifetime_secs: u64,
    ) -> Result<Self> {
        if let Err(e) = Command::new(docker_binary)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            tracing::debug!(container = %name, error = %e, "Failed to remove stale container (may not exist)");
        }

        let lifetime = lifetime_secs.to_string();
        let output = Command::new(docker_binary)
            .args(run_args(image, name, working_dir, &lifetime))
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!(
                "Failed to start Docker container '{}': {}",
                name,
                super::truncate(&String::from_utf8_lossy(&output.stderr), 500)
            );
        }

        tracing::info!(container = %name, image = image, "Sandbox container started");

        Ok(Self {
            name: name.to_string(),
            docker_binary: docker_binary.to_string(),
            removed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> SandboxTarget {
        SandboxTarget::new(self.name.clone())
    }

    /// Leaves the container running after this handle is dropped.
    pub fn detach(mut self) -> String {
        self.removed = true;
        std::mem::take(&mut self.name)
    }

    pub async fn destroy(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = Command::new(&self.docker_binary)
            .args(["rm", "-f", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            tracing::debug!(container = %self.name, error = %e, "Failed to destroy container");
        }
        self.removed = true;
        tracing::debug!(container = %self.name, "Sandbox container destroyed");
    }
}

/// Best-effort removal when `destroy` was skipped.
impl Drop for SandboxContainer {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let name = self.name.clone();
        let binary = self.docker_binary.clone();
        std::thread::spawn(move || {
            let _ = std::process::Command::new(binary)
                .args(["rm", "-f", &name])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
        });
    }
}

fn run_args<'a>(image: &'a str, name: &'a str, working_dir: &'a str, lifetime: &'a str) -> Vec<&'a str> {
    vec![
        "run",
        "-d",
        "--name",
        name,
        "-w",
        working_dir,
        image,
        "sleep",
        lifetime,
    ]
}
