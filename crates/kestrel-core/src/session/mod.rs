//! Session state and turn-history persistence.
//!
//! # Disk format (JSONL)
//!
//! Each session is a `.jsonl` file under `~/.kestrel/sessions/`.
//! - Line 1: metadata `{"_type": "metadata", "session_id": "...", "updated_at": "...", "turns": N}`
//! - Lines 2+: turns `{"role": "user", "content": "hello"}`

pub mod state;
pub mod store;

pub use state::{SessionEvent, SessionState, TokenUsage};
pub use store::{HistoryStore, HistorySummary};
