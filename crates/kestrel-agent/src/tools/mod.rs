//! Tool contract, dispatcher, and builtin tools.

pub mod base;
pub mod dispatcher;
pub mod fs;
pub mod git;
pub mod search;
pub mod shell;

use std::path::Path;
use std::sync::Arc;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool, ToolCategory};
pub use dispatcher::ToolDispatcher;
pub use search::{KeywordScorer, ScoringStrategy};

/// Dispatcher populated with every builtin tool rooted at `workspace`.
pub fn builtin_dispatcher(workspace: &Path, restrict: bool, shell_timeout_secs: u64) -> ToolDispatcher {
    let scope = fs::FsScope::new(workspace, restrict);
    let mut tools = ToolDispatcher::new();
    tools.register(Arc::new(fs::ReadFileTool::new(scope.clone())));
    tools.register(Arc::new(fs::ListFilesTool::new(scope.clone())));
    tools.register(Arc::new(fs::WriteFileTool::new(scope.clone())));
    tools.register(Arc::new(fs::EditFileTool::new(scope)));
    tools.register(Arc::new(shell::RunCommandTool::new(
        workspace.to_path_buf(),
        Some(shell_timeout_secs),
        restrict,
    )));
    tools.register(Arc::new(git::GitTool::new(workspace.to_path_buf())));
    tools.register(Arc::new(search::SearchCodeTool::new(workspace.to_path_buf())));
    tools
}
