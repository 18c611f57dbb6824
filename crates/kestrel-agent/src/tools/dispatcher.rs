//! Tool dispatcher: maps one invocation to one normalized result.
//!
//! Tools are registered during startup with [`ToolDispatcher::register`].
//! Later additions go through [`ToolDispatcher::register_plugin`], which is
//! logged so an override is never silent. Dispatch performs no retries.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, info, warn};

use kestrel_core::types::{ToolDefinition, ToolInvocation, ToolResult};
use kestrel_core::utils::truncate_string;

use super::base::{Tool, ToolCategory};

/// Upper bound on the known-tools listing in an unknown-tool failure.
const MAX_KNOWN_TOOLS_LEN: usize = 400;

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

/// Name-to-handler registry.
///
/// Owns `Arc<dyn Tool>` so handlers can be shared across concurrent fan-out.
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool during startup. A repeated name replaces the earlier handler.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "replacing previously registered tool");
        } else {
            debug!(tool = %name, category = tool.category().as_str(), "registered tool");
        }
        self.tools.insert(name, tool);
    }

    /// Register a tool from a plugin after startup.
    ///
    /// Returns the handler it replaced, if any.
    pub fn register_plugin(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        let previous = self.tools.insert(name.clone(), tool);
        match previous {
            Some(_) => warn!(tool = %name, "plugin overrides existing tool"),
            None => info!(tool = %name, "plugin tool registered"),
        }
        previous
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Category of a registered tool.
    pub fn category(&self, name: &str) -> Option<ToolCategory> {
        self.tools.get(name).map(|t| t.category())
    }

    /// Whether `name` is a registered state-mutating tool.
    pub fn is_mutating(&self, name: &str) -> bool {
        self.category(name).is_some_and(ToolCategory::is_mutating)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the LLM-facing definitions for all registered tools.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Run one invocation. Never fails: unknown names, handler errors and
    /// handler panics all become a failed [`ToolResult`].
    pub async fn execute(&self, invocation: &ToolInvocation) -> ToolResult {
        let name = invocation.name.as_str();
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "tool not found");
            let known = truncate_string(&self.tool_names().join(", "), MAX_KNOWN_TOOLS_LEN);
            return ToolResult::failure(format!(
                "Unknown tool '{name}'. Available tools: {known}"
            ));
        };

        let call = tool.execute(invocation.arguments.clone());
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(output)) => ToolResult::ok(output),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolResult::failure(format!("{e:#}"))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                warn!(tool = name, panic = %message, "tool handler panicked");
                ToolResult::failure(format!("{name} crashed: {message}"))
            }
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the dispatcher is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Minimal test tool.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            Ok(format!("Echo: {text}"))
        }
    }

    /// Tool that always fails.
    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Write
        }
        async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            anyhow::bail!("intentional failure")
        }
    }

    /// Tool whose handler panics.
    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            panic!("boom")
        }
    }

    fn invocation(name: &str, args: Value) -> ToolInvocation {
        ToolInvocation {
            id: "call_1".into(),
            name: name.into(),
            arguments: serde_json::from_value(args).unwrap(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(EchoTool));
        assert!(tools.has("echo"));
        assert!(!tools.has("nope"));
        assert_eq!(tools.len(), 1);
    }

    #[test]
    fn test_tool_names_sorted() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(FailTool));
        tools.register(Arc::new(EchoTool));
        assert_eq!(tools.tool_names(), vec!["echo", "fail"]);
    }

    #[test]
    fn test_get_definitions() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(EchoTool));
        let defs = tools.get_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "echo");
        assert_eq!(defs[0].tool_type, "function");
    }

    #[test]
    fn test_mutating_lookup() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(EchoTool));
        tools.register(Arc::new(FailTool));
        assert!(tools.is_mutating("fail"));
        assert!(!tools.is_mutating("echo"));
        assert!(!tools.is_mutating("missing"));
    }

    #[test]
    fn test_plugin_override_returns_previous() {
        let mut tools = ToolDispatcher::new();
        assert!(tools.register_plugin(Arc::new(EchoTool)).is_none());
        let previous = tools.register_plugin(Arc::new(EchoTool));
        assert!(previous.is_some());
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(EchoTool));
        let result = tools
            .execute(&invocation("echo", json!({"text": "hello"})))
            .await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("Echo: hello"));
    }

    #[tokio::test]
    async fn test_execute_unknown_lists_known_names() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(EchoTool));
        tools.register(Arc::new(FailTool));
        let result = tools.execute(&invocation("missing", json!({}))).await;
        assert!(!result.success);
        let err = result.error.unwrap();
        assert!(err.contains("Unknown tool 'missing'"));
        assert!(err.contains("echo"));
        assert!(err.contains("fail"));
    }

    #[tokio::test]
    async fn test_execute_error_caught() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(FailTool));
        let result = tools.execute(&invocation("fail", json!({}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("intentional failure"));
    }

    #[tokio::test]
    async fn test_execute_panic_caught() {
        let mut tools = ToolDispatcher::new();
        tools.register(Arc::new(PanicTool));
        let result = tools.execute(&invocation("explode", json!({}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("boom"));
    }

    #[test]
    fn test_default() {
        let tools = ToolDispatcher::default();
        assert!(tools.is_empty());
    }
}
