//! Configuration schema.
//!
//! Hierarchy: `Config` → `AgentConfig`, `ProviderConfig`, `ModelsConfig`,
//! `MemoryConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mode::Mode;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.kestrel/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub models: ModelsConfig,
    pub memory: MemoryConfig,
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// Agent loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Workspace directory the tools operate in.
    pub workspace: String,
    /// Model override. When set, every run is locked to this model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Starting mode for new sessions.
    pub mode: Mode,
    /// Maximum LLM ↔ tool iterations per task.
    pub max_iterations: usize,
    /// Estimated-token budget for stored history.
    pub token_budget: usize,
    /// Hard timeout for a single provider call, in seconds.
    pub timeout_secs: u64,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Command run after mutating tool rounds in build mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace: ".".to_string(),
            model: None,
            mode: Mode::Auto,
            max_iterations: 25,
            token_budget: 32_000,
            timeout_secs: 120,
            max_tokens: 4096,
            temperature: 0.2,
            test_command: None,
        }
    }
}

// ─────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────

/// Connection settings for the OpenAI-compatible endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for bearer authentication.
    pub api_key: String,
    /// API base URL (without `/chat/completions`).
    pub api_base: String,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            extra_headers: None,
        }
    }
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Models
// ─────────────────────────────────────────────

/// Per-mode model tables. Entries here override the built-in tables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelsConfig {
    /// Default model for each mode.
    pub defaults: HashMap<Mode, String>,
    /// Substitute model used when a mode's model hits a capacity limit.
    pub fallbacks: HashMap<Mode, String>,
}

// ─────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────

/// Conversation memory limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Fraction of turns kept when pruning (0.0 – 1.0).
    pub prune_fraction: f64,
    /// Hard cap on stored turns; the oldest turn is dropped beyond it.
    pub max_turns: usize,
    /// Histories shorter than this are never pruned.
    pub min_prune_turns: usize,
    /// Turns longer than this (in characters) are compressed on the way out.
    pub compress_threshold: usize,
    /// Where session histories are stored (default `~/.kestrel/sessions`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_dir: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            prune_fraction: 0.5,
            max_turns: 200,
            min_prune_turns: 8,
            compress_threshold: 2_000,
            sessions_dir: None,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
