//! Incremental decoder for `text/event-stream` chat-completion responses.
//!
//! The decoder is fed raw transport chunks in arrival order. Chunks are
//! buffered as bytes and only complete lines are interpreted, so the decoded
//! result does not depend on where chunk boundaries fall (including inside a
//! multi-byte UTF-8 character).
//!
//! Each `data:` line carries one JSON chunk. `data: [DONE]` marks logical
//! completion; anything after it is ignored. Lines that are not `data:` lines
//! are skipped, and `data:` payloads that fail to parse are skipped and
//! counted as anomalies.

use serde::Deserialize;
use tracing::trace;

use kestrel_core::types::{LlmResponse, ToolCall, UsageInfo};

/// Observer for text deltas as they are appended.
pub type DeltaCallback<'a> = dyn Fn(&str) + Send + Sync + 'a;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Highest tool-call slot index accepted from the wire.
pub const MAX_TOOL_SLOTS: usize = 128;

// ─────────────────────────────────────────────
// Wire chunks
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ─────────────────────────────────────────────
// Slots
// ─────────────────────────────────────────────

/// Accumulated state of one tool call, keyed by its stream index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallSlot {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallSlot {
    /// A placeholder slot that never received a delta.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.arguments.is_empty()
    }
}

// ─────────────────────────────────────────────
// StreamDecoder
// ─────────────────────────────────────────────

/// Reassembles a streamed chat completion into an [`LlmResponse`].
#[derive(Default)]
pub struct StreamDecoder<'a> {
    buffer: Vec<u8>,
    content: String,
    slots: Vec<ToolCallSlot>,
    finish_reason: Option<String>,
    usage: Option<UsageInfo>,
    done: bool,
    anomalies: usize,
    on_delta: Option<&'a DeltaCallback<'a>>,
}

impl std::fmt::Debug for StreamDecoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("buffered", &self.buffer.len())
            .field("content_len", &self.content.len())
            .field("slots", &self.slots.len())
            .field("done", &self.done)
            .field("anomalies", &self.anomalies)
            .finish()
    }
}

impl<'a> StreamDecoder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe each text delta as it is appended.
    pub fn with_callback(mut self, on_delta: &'a DeltaCallback<'a>) -> Self {
        self.on_delta = Some(on_delta);
        self
    }

    /// Feed one transport chunk.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.done {
            return;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&String::from_utf8_lossy(&line));
            if self.done {
                self.buffer.clear();
                return;
            }
        }
    }

    /// Whether the completion sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Text accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// All tool-call slots, including placeholders for skipped indices.
    pub fn slots(&self) -> &[ToolCallSlot] {
        &self.slots
    }

    /// Number of lines skipped as malformed.
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    /// Resolve into a response with whatever has been accumulated.
    ///
    /// A trailing unterminated line is interpreted if the sentinel was never
    /// seen. Placeholder slots are dropped and missing ids are synthesized.
    pub fn finish(mut self) -> LlmResponse {
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.process_line(&String::from_utf8_lossy(&rest));
        }

        let tool_calls = self
            .slots
            .into_iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(index, slot)| {
                let id = if slot.id.is_empty() {
                    format!("call_{index}")
                } else {
                    slot.id
                };
                let arguments = if slot.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    slot.arguments
                };
                ToolCall::new(id, slot.name, arguments)
            })
            .collect();

        LlmResponse {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }

    fn process_line(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            trace!(line, "ignoring non-data stream line");
            return;
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            self.done = true;
            return;
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => self.apply(chunk),
            Err(e) => {
                self.anomalies += 1;
                trace!(error = %e, payload, "skipping malformed stream chunk");
            }
        }
    }

    fn apply(&mut self, chunk: StreamChunk) {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            let Some(delta) = choice.delta else { continue };

            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                self.content.push_str(&text);
                if let Some(cb) = self.on_delta {
                    cb(&text);
                }
            }

            for call in delta.tool_calls.unwrap_or_default() {
                self.apply_tool_delta(call);
            }
        }
    }

    fn apply_tool_delta(&mut self, delta: ToolCallDelta) {
        if delta.index >= MAX_TOOL_SLOTS {
            trace!(index = delta.index, "tool-call index out of range, skipped");
            self.anomalies += 1;
            return;
        }
        if delta.index >= self.slots.len() {
            self.slots.resize_with(delta.index + 1, ToolCallSlot::default);
        }
        let slot = &mut self.slots[delta.index];

        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            if slot.id.is_empty() {
                slot.id = id;
            }
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                slot.name.push_str(&name);
            }
            if let Some(args) = function.arguments {
                slot.arguments.push_str(&args);
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
