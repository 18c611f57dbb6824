//! Intent router: classifies task text into a [`Mode`] and resolves a model.
//!
//! Scoring per mode is `keyword_hits × weight + phrase_hits × weight × 1.5`.
//! Keywords match whole words only; phrases match as substrings of the
//! lower-cased input. Ties are broken by [`TIE_BREAK_ORDER`].

use std::collections::HashMap;

use tracing::debug;

use kestrel_core::config::ModelsConfig;
use kestrel_core::{Mode, SessionState};

/// Phrase matches count this much more than keyword matches.
const PHRASE_MULTIPLIER: f64 = 1.5;

/// Inputs with fewer words than this default to [`Mode::Reason`] unless they
/// contain an authoring keyword.
const SHORT_INPUT_WORDS: usize = 6;

/// Words that mark a short input as a task rather than a question.
const AUTHORING_KEYWORDS: &[&str] = &[
    "write", "create", "implement", "build", "add", "generate", "make", "fix", "refactor",
];

/// Among modes with an equal top score, the earliest here wins.
pub const TIE_BREAK_ORDER: [Mode; 6] = [
    Mode::Code,
    Mode::Debug,
    Mode::Build,
    Mode::Optimize,
    Mode::Docs,
    Mode::Reason,
];

// ─────────────────────────────────────────────
// Mode table
// ─────────────────────────────────────────────

/// Trigger vocabulary for one mode.
#[derive(Clone, Debug)]
pub struct ModeSpec {
    pub mode: Mode,
    /// Single lower-case words.
    pub keywords: &'static [&'static str],
    /// Lower-case multi-word phrases.
    pub phrases: &'static [&'static str],
    pub weight: f64,
}

/// Classification table, one entry per non-auto mode.
pub static MODE_SPECS: &[ModeSpec] = &[
    ModeSpec {
        mode: Mode::Reason,
        keywords: &[
            "why", "how", "explain", "understand", "compare", "difference", "tradeoff",
            "tradeoffs", "should", "think", "reason", "plan",
        ],
        phrases: &["how does", "what is", "why does", "walk me through", "pros and cons"],
        weight: 1.0,
    },
    ModeSpec {
        mode: Mode::Code,
        keywords: &[
            "implement", "write", "function", "refactor", "class", "method", "struct",
            "module", "code", "add", "rename", "trait", "api",
        ],
        phrases: &["write a function", "implement a", "add a", "refactor this", "unit test"],
        weight: 1.2,
    },
    ModeSpec {
        mode: Mode::Build,
        keywords: &[
            "build", "scaffold", "project", "setup", "bootstrap", "app", "application",
            "compile", "deploy", "dependencies", "cli", "service",
        ],
        phrases: &["build a", "set up", "create a project", "from scratch", "new project"],
        weight: 1.1,
    },
    ModeSpec {
        mode: Mode::Debug,
        keywords: &[
            "debug", "fix", "bug", "error", "crash", "crashes", "failing", "fails", "broken",
            "panic", "exception", "traceback", "wrong",
        ],
        phrases: &["not working", "doesn't work", "stack trace", "fix the", "what went wrong"],
        weight: 1.3,
    },
    ModeSpec {
        mode: Mode::Optimize,
        keywords: &[
            "optimize", "optimise", "faster", "performance", "efficient", "speed", "slow",
            "latency", "memory", "allocations", "profile", "benchmark",
        ],
        phrases: &["more efficient", "speed up", "make it faster", "reduce memory", "too slow"],
        weight: 1.25,
    },
    ModeSpec {
        mode: Mode::Docs,
        keywords: &[
            "document", "docs", "documentation", "readme", "docstring", "docstrings",
            "comment", "comments", "changelog", "tutorial",
        ],
        phrases: &["write docs", "add comments", "update the readme", "doc comments"],
        weight: 1.0,
    },
];

// ─────────────────────────────────────────────
// Built-in model tables
// ─────────────────────────────────────────────

fn builtin_default(mode: Mode) -> &'static str {
    match mode {
        Mode::Reason => "o4-mini",
        Mode::Docs => "gpt-4.1-mini",
        Mode::Auto | Mode::Code | Mode::Build | Mode::Debug | Mode::Optimize => "gpt-4.1",
    }
}

fn builtin_fallback(mode: Mode) -> &'static str {
    match mode {
        Mode::Docs => "gpt-4.1-nano",
        _ => "gpt-4.1-mini",
    }
}

// ─────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────

/// Outcome of routing one task.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteDecision {
    pub model: String,
    pub mode: Mode,
    /// `true` only when the mode came from live classification.
    pub routed: bool,
}

/// Maps task text to a mode and each mode to a default and fallback model.
#[derive(Clone, Debug, Default)]
pub struct IntentRouter {
    defaults: HashMap<Mode, String>,
    fallbacks: HashMap<Mode, String>,
}

impl IntentRouter {
    /// Router with the built-in tables only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router whose tables are overlaid by the `models` config section.
    pub fn from_config(models: &ModelsConfig) -> Self {
        Self {
            defaults: models.defaults.clone(),
            fallbacks: models.fallbacks.clone(),
        }
    }

    /// Default model for `mode`.
    pub fn default_model(&self, mode: Mode) -> &str {
        self.defaults
            .get(&mode)
            .map(String::as_str)
            .unwrap_or_else(|| builtin_default(mode))
    }

    /// Substitute model for `mode` after a capacity failure.
    pub fn fallback_model(&self, mode: Mode) -> &str {
        self.fallbacks
            .get(&mode)
            .map(String::as_str)
            .unwrap_or_else(|| builtin_fallback(mode))
    }

    /// Resolve `(model, mode)` for a task under the session's current settings.
    pub fn route(&self, input: &str, session: &SessionState) -> RouteDecision {
        if let Some(model) = session.locked_model() {
            let mode = if session.mode().is_auto() {
                Mode::Code
            } else {
                session.mode()
            };
            return RouteDecision {
                model: model.to_string(),
                mode,
                routed: false,
            };
        }

        if !session.mode().is_auto() {
            let mode = session.mode();
            return RouteDecision {
                model: self.default_model(mode).to_string(),
                mode,
                routed: false,
            };
        }

        let mode = classify(input);
        debug!(mode = %mode, "routed task");
        RouteDecision {
            model: self.default_model(mode).to_string(),
            mode,
            routed: true,
        }
    }
}

// ─────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────

fn words(input: &str) -> Vec<String> {
    input
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Per-mode scores for `input`, in table order.
pub fn scores(input: &str) -> Vec<(Mode, f64)> {
    let tokens = words(input);
    let lower = input.to_lowercase();

    MODE_SPECS
        .iter()
        .map(|spec| {
            let keyword_hits = tokens
                .iter()
                .filter(|t| spec.keywords.contains(&t.as_str()))
                .count() as f64;
            let phrase_hits: usize = spec.phrases.iter().map(|p| lower.matches(p).count()).sum();
            let score =
                keyword_hits * spec.weight + phrase_hits as f64 * spec.weight * PHRASE_MULTIPLIER;
            (spec.mode, score)
        })
        .collect()
}

/// Classify task text into a concrete (non-auto) mode.
pub fn classify(input: &str) -> Mode {
    let tokens = words(input);
    if tokens.len() < SHORT_INPUT_WORDS
        && !tokens.iter().any(|t| AUTHORING_KEYWORDS.contains(&t.as_str()))
    {
        return Mode::Reason;
    }

    let scored = scores(input);
    let best = scored.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
    if best <= 0.0 {
        return Mode::Reason;
    }

    TIE_BREAK_ORDER
        .iter()
        .copied()
        .find(|mode| scored.iter().any(|(m, s)| m == mode && *s == best))
        .unwrap_or(Mode::Reason)
}
