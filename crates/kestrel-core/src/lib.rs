//! Kestrel core: types, modes, session state, history store, and config.
//!
//! This crate contains:
//! - **types**: conversation turns, tool calls, and the chat-completion wire format
//! - **mode**: the operating-mode enumeration
//! - **session**: per-session state and JSONL turn persistence
//! - **config**: schema, loader, env overrides

pub mod config;
pub mod mode;
pub mod session;
pub mod types;
pub mod utils;

pub use mode::Mode;
pub use session::{HistoryStore, SessionEvent, SessionState, TokenUsage};
pub use types::{LlmResponse, Message, Role, ToolCall, ToolDefinition, ToolInvocation, ToolResult};
