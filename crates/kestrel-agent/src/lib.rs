//! Kestrel agent: loop, tools, routing, and context memory.
//!
//! This crate contains:
//! - **tools**: Tool trait, dispatcher, and builtin tools (files, shell, git, search)
//! - **router**: task classification into modes and per-mode model tables
//! - **memory**: the per-session turn list with compression and pruning
//! - **prompt**: system prompt construction
//! - **correction**: self-correction hints for failed tool calls
//! - **agent_loop**: the LLM ↔ tool-calling main loop
//! - **fanout**: concurrent reasoning and persona review
//! - **testing**: test-suite runner used in build mode

pub mod agent_loop;
pub mod correction;
pub mod fanout;
pub mod memory;
pub mod prompt;
pub mod router;
pub mod testing;
pub mod tools;

pub use agent_loop::{AgentEvent, AgentLoop, AgentLoopConfig, AgentRunResult, LoopState, ToolOutcome};
pub use fanout::{FanOut, Persona, DEFAULT_PERSONAS};
pub use memory::ContextMemory;
pub use prompt::build_system_prompt;
pub use router::{IntentRouter, RouteDecision};
pub use testing::{CommandTestRunner, TestReport, TestRunner};
pub use tools::{builtin_dispatcher, Tool, ToolCategory, ToolDispatcher};
