//! Read-only git access for the workspace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use kestrel_core::utils::truncate_string;

use super::base::{optional_string, require_string, Tool, ToolCategory};

const ALLOWED_SUBCOMMANDS: &[&str] = &["status", "diff", "log", "show", "branch"];

/// `git branch` flags that would modify refs.
const BRANCH_WRITE_FLAGS: &[&str] = &["-d", "-D", "-m", "-M", "-c", "-C", "--delete", "--move", "--copy", "-f", "--force"];

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_LEN: usize = 20_000;

/// Runs an allow-listed, read-only git subcommand in the workspace.
pub struct GitTool {
    repo_dir: PathBuf,
}

impl GitTool {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    fn check(subcommand: &str, args: &[&str]) -> anyhow::Result<()> {
        if !ALLOWED_SUBCOMMANDS.contains(&subcommand) {
            anyhow::bail!(
                "git subcommand '{subcommand}' is not permitted (read-only: {})",
                ALLOWED_SUBCOMMANDS.join(", ")
            );
        }
        if subcommand == "branch" {
            let writes = args
                .iter()
                .any(|a| BRANCH_WRITE_FLAGS.contains(a) || !a.starts_with('-'));
            if writes {
                anyhow::bail!("git branch is not permitted to create, rename or delete branches");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Inspect the workspace repository with a read-only git subcommand: \
         status, diff, log, show, or branch (listing only)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subcommand": {
                    "type": "string",
                    "enum": ALLOWED_SUBCOMMANDS,
                    "description": "The git subcommand"
                },
                "args": {
                    "type": "string",
                    "description": "Extra arguments, space separated (e.g. \"--stat HEAD~1\")"
                }
            },
            "required": ["subcommand"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::VersionControl
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let subcommand = require_string(&params, "subcommand")?;
        let extra = optional_string(&params, "args").unwrap_or_default();
        let args: Vec<&str> = extra.split_whitespace().collect();
        Self::check(&subcommand, &args)?;

        debug!(subcommand = %subcommand, args = %extra, "running git");
        let child = Command::new("git")
            .arg("--no-pager")
            .arg(&subcommand)
            .args(&args)
            .current_dir(&self.repo_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to run git: {e}"))?;

        let output = tokio::time::timeout(GIT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("git {subcommand} timed out"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {subcommand} failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok("(no output)".into());
        }
        Ok(truncate_string(&stdout, MAX_OUTPUT_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(sub: &str, args: Option<&str>) -> HashMap<String, Value> {
        let mut p = HashMap::new();
        p.insert("subcommand".into(), json!(sub));
        if let Some(a) = args {
            p.insert("args".into(), json!(a));
        }
        p
    }

    #[test]
    fn test_allow_list() {
        assert!(GitTool::check("status", &[]).is_ok());
        assert!(GitTool::check("log", &["--oneline", "-5"]).is_ok());
        assert!(GitTool::check("branch", &["-a"]).is_ok());
        assert!(GitTool::check("push", &[]).is_err());
        assert!(GitTool::check("commit", &["-m", "x"]).is_err());
        assert!(GitTool::check("branch", &["-D", "main"]).is_err());
        assert!(GitTool::check("branch", &["new-feature"]).is_err());
    }

    #[tokio::test]
    async fn test_rejected_subcommand_reports_not_permitted() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GitTool::new(dir.path().to_path_buf());
        let err = tool.execute(params("push", Some("origin"))).await.unwrap_err();
        assert!(err.to_string().contains("not permitted"));
    }

    #[tokio::test]
    async fn test_status_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GitTool::new(dir.path().to_path_buf());
        assert!(tool.execute(params("status", None)).await.is_err());
    }

    #[test]
    fn test_category_is_not_mutating() {
        let tool = GitTool::new(PathBuf::from("."));
        assert_eq!(tool.category(), ToolCategory::VersionControl);
        assert!(!tool.category().is_mutating());
    }
}
