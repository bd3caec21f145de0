//! Terminal task catalog loaded from YAML.
//!
//! ```yaml
//! tasks:
//!   - id: hello-world
//!     instruction: Create /app/hello.txt containing "Hello, world!"
//!     image: ubuntu:24.04
//!     difficulty: easy
//!     verify: grep -qx 'Hello, world!' /app/hello.txt
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One shell task. Exactly one of `container` (already running) or `image`
/// (started by the harness) names the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalTask {
    pub id: String,
    pub instruction: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    /// Command whose exit code 0 marks the task resolved.
    #[serde(default)]
    pub verify: Option<String>,
}

/// How a task's sandbox is provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxSource<'a> {
    Existing(&'a str),
    Image(&'a str),
}

impl TerminalTask {
    pub fn sandbox_source(&self) -> Result<SandboxSource<'_>> {
        match (self.container.as_deref(), self.image.as_deref()) {
            (Some(container), None) => Ok(SandboxSource::Existing(container)),
            (None, Some(image)) => Ok(SandboxSource::Image(image)),
            (Some(_), Some(_)) => {
                anyhow::bail!("task '{}' sets both container and image", self.id)
            }
            (None, None) => anyhow::bail!("task '{}' sets neither container nor image", self.id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCatalog {
    pub tasks: Vec<TerminalTask>,
}

impl TaskCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task catalog {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid task catalog {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let catalog: Self = serde_yaml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                anyhow::bail!("duplicate task id '{}'", task.id);
            }
            task.sandbox_source()?;
        }
        Ok(())
    }

    /// Tasks named by `ids`, in that order; all tasks when `ids` is empty.
    pub fn select(&self, ids: &[String]) -> Result<Vec<TerminalTask>> {
        if ids.is_empty() {
            return Ok(self.tasks.clone());
        }
        ids.iter()
            .map(|id| {
                self.tasks
                    .iter()
                    .find(|task| &task.id == id)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("unknown task id '{}'", id))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
tasks:
  - id: hello-world
    instruction: Create hello.txt
    image: ubuntu:24.04
    difficulty: easy
    verify: test -f hello.txt
  - id: fix-permissions
    instruction: Make run.sh executable
    container: tb-fix-permissions
"#;

    #[test]
    fn test_parse_and_select() {
        let catalog = TaskCatalog::from_yaml_str(CATALOG).expect("catalog");
        assert_eq!(catalog.tasks.len(), 2);
        assert_eq!(
            catalog.tasks[0].sandbox_source().expect("source"),
            SandboxSource::Image("ubuntu:24.04")
        );
        assert_eq!(
            catalog.tasks[1].sandbox_source().expect("source"),
            SandboxSource::Existing("tb-fix-permissions")
        );

        let all = catalog.select(&[]).expect("all");
        assert_eq!(all.len(), 2);

        let picked = catalog
            .select(&["fix-permissions".to_string()])
            .expect("picked");
        assert_eq!(picked[0].id, "fix-permissions");
        assert!(picked[0].verify.is_none());

        assert!(catalog.select(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_rejects_ambiguous_sandbox() {
        let both = "tasks:\n  - id: a\n    instruction: x\n    image: i\n    container: c\n";
        assert!(TaskCatalog::from_yaml_str(both).is_err());

        let neither = "tasks:\n  - id: a\n    instruction: x\n";
        assert!(TaskCatalog::from_yaml_str(neither).is_err());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let dup = "tasks:\n  - {id: a, instruction: x, image: i}\n  - {id: a, instruction: y, image: i}\n";
        let err = TaskCatalog::from_yaml_str(dup).unwrap_err();
        assert!(err.to_string().contains("duplicate task id"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TaskCatalog::load(Path::new("/nonexistent/tasks.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read task catalog"));
    }
}
