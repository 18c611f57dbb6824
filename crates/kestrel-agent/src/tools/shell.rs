//! Shell tool: run commands in a subprocess.
//!
//! Includes a deny-pattern safety guard and optional workspace restriction.
//! [`run_shell`] is shared with the build-mode test runner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use kestrel_core::utils::truncate_string;

use super::base::{optional_i64, optional_string, require_string, Tool, ToolCategory};
use super::fs::FsScope;

/// Maximum output length before truncation (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Default command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Dangerous command patterns that are always blocked (matched lower-cased).
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\b(mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
    r"\bgit\s+push\b.*(--force|\s-f\b)",
    r"\bgit\s+(reset\s+--hard|clean\s+-[a-z]*f)",
    r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z)?sh\b",
    r"\bchmod\s+-r\s+777\b",
];

/// Absolute paths in a command line (POSIX or Windows drive form).
const ABS_PATH_PATTERN: &str = r#"(?:^|\s)(/[^\s"']+|[A-Za-z]:\\[^\s"']+)"#;

// ─────────────────────────────────────────────
// Command guard
// ─────────────────────────────────────────────

/// Rejects destructive command lines, and in confined mode any command that
/// reaches outside the working directory.
struct CommandGuard {
    deny: Vec<Regex>,
    abs_paths: Option<Regex>,
    confined: bool,
}

impl CommandGuard {
    fn new(confined: bool) -> Self {
        Self {
            deny: DENY_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect(),
            abs_paths: Regex::new(ABS_PATH_PATTERN).ok(),
            confined,
        }
    }

    fn check(&self, command: &str, cwd: &Path) -> Result<(), String> {
        let lower = command.to_lowercase();
        if self.deny.iter().any(|re| re.is_match(&lower)) {
            warn!(command, "command rejected by deny list");
            return Err("Command blocked by safety guard (dangerous pattern detected)".into());
        }
        if !self.confined {
            return Ok(());
        }
        if command.contains("../") || command.contains("..\\") {
            return Err("Command blocked: path traversal (../) not allowed in restricted mode".into());
        }
        match self.escaping_path(command, cwd) {
            Some(path) => Err(format!("Command blocked: path '{path}' is outside the workspace")),
            None => Ok(()),
        }
    }

    /// First absolute path in `command` that does not resolve under `cwd`.
    fn escaping_path<'c>(&self, command: &'c str, cwd: &Path) -> Option<&'c str> {
        let resolve = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        let root = resolve(cwd);
        self.abs_paths
            .as_ref()?
            .captures_iter(command)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .find(|p| !resolve(Path::new(p)).starts_with(&root))
    }
}

// ─────────────────────────────────────────────
// RunCommandTool
// ─────────────────────────────────────────────

/// `run_command`: executes a command line in the workspace.
pub struct RunCommandTool {
    scope: FsScope,
    timeout: Duration,
    guard: CommandGuard,
}

impl RunCommandTool {
    /// `confined` rejects commands, and `working_dir` arguments, that reach
    /// outside `workspace`.
    pub fn new(workspace: PathBuf, timeout_secs: Option<u64>, confined: bool) -> Self {
        Self {
            scope: FsScope::new(workspace, confined),
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            guard: CommandGuard::new(confined),
        }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output. \
         Use this for builds, tests, and other CLI tools. A non-zero exit is reported as a failure."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory (defaults to workspace root)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Optional timeout override in seconds"
                }
            },
            "required": ["command"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let cwd = match optional_string(&params, "working_dir") {
            Some(dir) => self.scope.resolve(&dir)?,
            None => self.scope.root().to_path_buf(),
        };
        let timeout = optional_i64(&params, "timeout_secs")
            .filter(|t| *t > 0)
            .map(|t| Duration::from_secs(t as u64))
            .unwrap_or(self.timeout);

        self.guard
            .check(&command, self.scope.root())
            .map_err(anyhow::Error::msg)?;

        info!(command = %command, cwd = %cwd.display(), "running shell command");
        let output = run_shell(&command, &cwd, timeout).await?;
        if output.success() {
            Ok(output.render())
        } else {
            anyhow::bail!("{}", output.render())
        }
    }
}

// ─────────────────────────────────────────────
// Shared runner
// ─────────────────────────────────────────────

/// Captured result of a finished shell command.
#[derive(Debug)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Combined, length-bounded text for the model.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if !self.stdout.is_empty() {
            parts.push(self.stdout.clone());
        }
        if !self.stderr.is_empty() {
            parts.push(format!("STDERR:\n{}", self.stderr));
        }
        if self.code != 0 {
            parts.push(format!("Exit code: {}", self.code));
        }

        let combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        let total = combined.chars().count();
        if total > MAX_OUTPUT_LEN {
            let mut cut = truncate_string(&combined, MAX_OUTPUT_LEN);
            cut.push_str(&format!(" (truncated, {} more chars)", total - MAX_OUTPUT_LEN));
            cut
        } else {
            combined
        }
    }
}

/// Run `command` through the platform shell with a deadline.
pub async fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> anyhow::Result<CommandOutput> {
    let child = Command::new(if cfg!(target_os = "windows") { "cmd" } else { "sh" })
        .args(if cfg!(target_os = "windows") {
            ["/C", command]
        } else {
            ["-c", command]
        })
        .current_dir(cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to spawn command: {e}"))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
        Ok(Err(e)) => anyhow::bail!("Command failed: {e}"),
        Err(_) => anyhow::bail!("Command timed out after {} seconds", timeout.as_secs()),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
