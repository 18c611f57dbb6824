//! Tool trait: the call/return contract every tool handler implements.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use kestrel_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Tool category
// ─────────────────────────────────────────────

/// What a tool does to the workspace. Governs the dispatch retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    Read,
    Search,
    VersionControl,
    Write,
    Edit,
    Patch,
    Shell,
}

impl ToolCategory {
    /// Categories that change files or run arbitrary commands.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            ToolCategory::Write | ToolCategory::Edit | ToolCategory::Patch | ToolCategory::Shell
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolCategory::Read => "read",
            ToolCategory::Search => "search",
            ToolCategory::VersionControl => "vcs",
            ToolCategory::Write => "write",
            ToolCategory::Edit => "edit",
            ToolCategory::Patch => "patch",
            ToolCategory::Shell => "shell",
        }
    }
}

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// A named, schema-described action the model can request.
///
/// Handlers return their output text or an error. They never see retries;
/// the dispatcher turns an `Err` (or a panic) into a failed result and the
/// loop decides whether to call again based on [`category`](Tool::category).
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by, such as `read_file`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema object for the arguments.
    fn parameters(&self) -> Value;

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// Function descriptor advertised to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Argument access
// ─────────────────────────────────────────────

fn arg<'a, T>(
    params: &'a HashMap<String, Value>,
    key: &str,
    read: impl FnOnce(&'a Value) -> Option<T>,
) -> Option<T> {
    params.get(key).and_then(read)
}

/// String argument that must be present.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    optional_string(params, key).ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    arg(params, key, Value::as_str).map(str::to_owned)
}

pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    arg(params, key, Value::as_i64)
}

/// Boolean flag; absent or non-boolean reads as `false`.
pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    arg(params, key, Value::as_bool).unwrap_or(false)
}
