//! Core types for Kestrel: conversation turns, tool calls, and the
//! OpenAI-compatible chat-completion wire format.
//!
//! A conversation turn is a [`Message`]; the same enum is what goes over the
//! wire and what is persisted to disk, so a stored history can be replayed to
//! a provider without conversion.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

/// Prefix of the text the model reads for a failed tool call.
///
/// Failure itself is recorded by the `failed` flag on the tool turn; the
/// prefix is only how the failure reads.
pub const TOOL_ERROR_MARKER: &str = "Error:";

// ─────────────────────────────────────────────
// Messages (conversation turns)
// ─────────────────────────────────────────────

/// The role of a turn, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A chat message in the OpenAI format.
///
/// Each variant maps to a `role` field value. Tool turns carry the
/// correlation id of the invocation they answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: String },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
        /// Persisted with the history; never sent to a provider.
        #[serde(default, skip_serializing_if = "is_false")]
        failed: bool,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Create an assistant message carrying tool calls and the raw text that
    /// accompanied them (if any).
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let content = content.into();
        Message::Assistant {
            content: if content.is_empty() { None } else { Some(content) },
            tool_calls: Some(tool_calls),
        }
    }

    /// Create a successful tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            failed: false,
        }
    }

    /// Tool turn for a dispatch outcome, keeping its success flag.
    pub fn tool_outcome(tool_call_id: impl Into<String>, result: &ToolResult) -> Self {
        Message::Tool {
            content: result.to_turn_content(),
            tool_call_id: tool_call_id.into(),
            failed: !result.success,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::Tool { .. } => Role::Tool,
        }
    }

    /// Text content of the turn (empty for a tool-calls-only assistant turn).
    pub fn text(&self) -> &str {
        match self {
            Message::System { content } | Message::User { content } => content,
            Message::Assistant { content, .. } => content.as_deref().unwrap_or(""),
            Message::Tool { content, .. } => content,
        }
    }

    /// Replace the text content, keeping role and attachments.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        let text = text.into();
        match self {
            Message::System { .. } => Message::System { content: text },
            Message::User { .. } => Message::User { content: text },
            Message::Assistant { tool_calls, .. } => Message::Assistant {
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: tool_calls.clone(),
            },
            Message::Tool {
                tool_call_id,
                failed,
                ..
            } => Message::Tool {
                content: text,
                tool_call_id: tool_call_id.clone(),
                failed: *failed,
            },
        }
    }

    /// Tool calls attached to an assistant turn; empty for every other role.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant {
                tool_calls: Some(calls),
                ..
            } => calls,
            _ => &[],
        }
    }

    /// Whether this is a tool-result turn reporting a failure.
    pub fn is_tool_error(&self) -> bool {
        matches!(self, Message::Tool { failed: true, .. })
    }

    /// Character length used for budget estimation, including serialized
    /// tool-call payloads.
    pub fn char_len(&self) -> usize {
        let calls: usize = self
            .tool_calls()
            .iter()
            .map(|tc| tc.function.name.chars().count() + tc.function.arguments.chars().count())
            .sum();
        self.text().chars().count() + calls
    }
}

// ─────────────────────────────────────────────
// Tool Calls (function calling)
// ─────────────────────────────────────────────

/// A tool call from the assistant, as it appears on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Correlation id (used to match results).
    pub id: String,
    /// Always "function" in current OpenAI API.
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function to call.
    pub function: FunctionCall,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Decode into a [`ToolInvocation`].
    ///
    /// An empty arguments string means no arguments. Anything else must be a
    /// JSON object.
    pub fn invocation(&self) -> Result<ToolInvocation, serde_json::Error> {
        let raw = self.function.arguments.trim();
        let arguments: HashMap<String, Value> = if raw.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(raw)?
        };
        Ok(ToolInvocation {
            id: self.id.clone(),
            name: self.function.name.clone(),
            arguments,
        })
    }
}

/// The function name and arguments within a tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// Name of the function/tool to call.
    pub name: String,
    /// JSON-encoded arguments string.
    pub arguments: String,
}

/// A decoded request to run a named tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    /// Correlation id, unique within its assistant turn.
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, Value>,
}

/// Normalized outcome of a tool dispatch. Handlers may fail; a `ToolResult`
/// never does.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Content for the tool-result turn the model will read.
    pub fn to_turn_content(&self) -> String {
        if self.success {
            self.output.clone().unwrap_or_default()
        } else {
            format!(
                "{TOOL_ERROR_MARKER} {}",
                self.error.as_deref().unwrap_or("unknown failure")
            )
        }
    }
}

// ─────────────────────────────────────────────
// Tool Definitions (for LLM requests)
// ─────────────────────────────────────────────

/// Definition of a tool, sent to the LLM so it knows what tools are available.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Always "function".
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function schema.
    pub function: FunctionDefinition,
}

/// Schema of a function tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// LLM Response
// ─────────────────────────────────────────────

/// A fully decoded model response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmResponse {
    /// Accumulated assistant text (may be empty).
    pub content: String,
    /// Tool calls requested by the assistant.
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped generating.
    pub finish_reason: Option<String>,
    /// Token usage statistics, when the provider reports them.
    pub usage: Option<UsageInfo>,
}

impl LlmResponse {
    /// A plain text response with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        LlmResponse {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Whether the response contains tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage statistics from the LLM.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ─────────────────────────────────────────────
// Chat completion request
// ─────────────────────────────────────────────

/// Request body for a streaming OpenAI-compatible chat completion.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    #[serde(serialize_with = "wire_messages")]
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

/// Tool turns go out as `{role, content, tool_call_id}` only.
fn wire_messages<S: Serializer>(messages: &&[Message], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(messages.iter().map(WireMessage))
}

struct WireMessage<'a>(&'a Message);

impl Serialize for WireMessage<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Message::Tool {
                content,
                tool_call_id,
                ..
            } => {
                let mut turn = serializer.serialize_struct("Tool", 3)?;
                turn.serialize_field("role", "tool")?;
                turn.serialize_field("content", content)?;
                turn.serialize_field("tool_call_id", tool_call_id)?;
                turn.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Streaming options (asks the provider to append a usage chunk).
#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_text_message_serialization() {
        let msg = Message::assistant("The answer is 42.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "The answer is 42.");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_assistant_tool_calls_serialization() {
        let calls = vec![ToolCall::new("call_123", "list_files", r#"{"path": "."}"#)];
        let msg = Message::assistant_tool_calls("", calls);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert!(json.get("content").is_none());
        let calls = json["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["id"], "call_123");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["name"], "list_files");
    }

    #[test]
    fn test_tool_result_serialization() {
        let msg = Message::tool_result("call_123", "a.rs\nb.rs");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_123");
    }

    #[test]
    fn test_assistant_with_null_content_deserializes() {
        let json = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_abc",
                "type": "function",
                "function": { "name": "read_file", "arguments": "{\"path\": \"x\"}" }
            }]
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.role(), Role::Assistant);
        assert_eq!(msg.text(), "");
        assert_eq!(msg.tool_calls().len(), 1);
    }

    #[test]
    fn test_invocation_decodes_arguments() {
        let call = ToolCall::new("c1", "list_files", r#"{"path": ".", "depth": 2}"#);
        let inv = call.invocation().unwrap();
        assert_eq!(inv.id, "c1");
        assert_eq!(inv.name, "list_files");
        assert_eq!(inv.arguments["path"], json!("."));
        assert_eq!(inv.arguments["depth"], json!(2));
    }

    #[test]
    fn test_invocation_rejects_malformed_arguments() {
        assert!(ToolCall::new("c1", "list_files", "{not json").invocation().is_err());
        assert!(ToolCall::new("c1", "list_files", "[1, 2]").invocation().is_err());
        let empty = ToolCall::new("c1", "list_files", "  ").invocation().unwrap();
        assert!(empty.arguments.is_empty());
    }

    #[test]
    fn test_tool_result_turn_content() {
        assert_eq!(ToolResult::ok("done").to_turn_content(), "done");
        let failed = ToolResult::failure("file not found");
        assert_eq!(failed.to_turn_content(), "Error: file not found");
        assert!(Message::tool_outcome("c", &failed).is_tool_error());
        assert!(!Message::tool_outcome("c", &ToolResult::ok("ok")).is_tool_error());
    }

    #[test]
    fn test_error_text_in_successful_output_is_not_a_failure() {
        let source = ToolResult::ok(r#"fn main() { eprintln!("Error: bad input"); }"#);
        assert!(!Message::tool_outcome("c", &source).is_tool_error());
        assert!(!Message::tool_result("c", "Error: copied from a log").is_tool_error());
    }

    #[test]
    fn test_failure_flag_persists_but_stays_off_the_wire() {
        let turn = Message::tool_outcome("c7", &ToolResult::failure("denied"));
        let stored = serde_json::to_string(&turn).unwrap();
        let restored: Message = serde_json::from_str(&stored).unwrap();
        assert!(restored.is_tool_error());
        assert!(restored.with_text("short").is_tool_error());

        let messages = [turn];
        let request = ChatCompletionRequest {
            model: "m",
            messages: &messages,
            tools: None,
            tool_choice: None,
            max_tokens: None,
            temperature: None,
            stream: true,
            stream_options: None,
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(
            wire["messages"][0],
            json!({"role": "tool", "content": "Error: denied", "tool_call_id": "c7"})
        );
    }

    #[test]
    fn test_char_len_counts_tool_payloads() {
        let msg = Message::assistant_tool_calls("hi", vec![ToolCall::new("c", "ab", "{}")]);
        assert_eq!(msg.char_len(), 2 + 2 + 2);
    }

    #[test]
    fn test_with_text_keeps_correlation() {
        let msg = Message::tool_result("call_9", "long output");
        match msg.with_text("short") {
            Message::Tool {
                content,
                tool_call_id,
                ..
            } => {
                assert_eq!(content, "short");
                assert_eq!(tool_call_id, "call_9");
            }
            _ => panic!("Expected Tool message"),
        }
    }

    #[test]
    fn test_streaming_request_serialization() {
        let messages = vec![Message::system("You are Kestrel."), Message::user("Hello")];
        let request = ChatCompletionRequest {
            model: "gpt-4o",
            messages: &messages,
            tools: None,
            tool_choice: None,
            max_tokens: Some(4096),
            temperature: None,
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert!(json.get("tools").is_none());
        assert!(json.get("temperature").is_none());
    }
}
