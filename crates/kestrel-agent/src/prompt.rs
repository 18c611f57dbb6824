//! System prompt construction.

use std::path::Path;

use chrono::Utc;
use tracing::debug;

use kestrel_core::utils::truncate_string;

/// Project guide files injected into the prompt when present at the root.
const GUIDE_FILES: &[&str] = &["AGENTS.md", "CONTRIBUTING.md"];

const MAX_GUIDE_CHARS: usize = 4_000;

/// Identity, working rules, and any project guide files.
pub fn build_system_prompt(workspace: &Path, tool_names: &[String]) -> String {
    let now = Utc::now().format("%Y-%m-%d %H:%M UTC");
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let tools = if tool_names.is_empty() {
        "(none)".to_string()
    } else {
        tool_names.join(", ")
    };

    let mut parts = vec![format!(
        "# Identity\n\n\
         You are Kestrel, a coding agent working inside a software project.\n\n\
         - **Date/time**: {now}\n\
         - **Platform**: {os}/{arch}\n\
         - **Workspace**: `{}`\n\
         - **Tools**: {tools}\n\n\
         # Rules\n\n\
         - Inspect before you change: read files and search the code first.\n\
         - Make the smallest edit that does the job; keep the existing style.\n\
         - When a tool fails, read the error and change your approach.\n\
         - Reply with a short summary of what you did once the task is done.",
        workspace.display()
    )];

    for name in GUIDE_FILES {
        let path = workspace.join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            debug!(file = name, "loaded guide file");
            parts.push(format!("## {name}\n\n{}", truncate_string(&content, MAX_GUIDE_CHARS)));
        }
    }

    parts.join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_tools_and_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = build_system_prompt(dir.path(), &["read_file".into(), "git".into()]);
        assert!(prompt.contains("read_file, git"));
        assert!(prompt.contains(&dir.path().display().to_string()));
        assert!(!prompt.contains("AGENTS.md"));
    }

    #[test]
    fn test_guide_file_is_injected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Run `make check` before finishing.").unwrap();
        let prompt = build_system_prompt(dir.path(), &[]);
        assert!(prompt.contains("## AGENTS.md"));
        assert!(prompt.contains("make check"));
        assert!(prompt.contains("(none)"));
    }
}
