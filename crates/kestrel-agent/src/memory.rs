//! Context memory: the ordered turn list for one session.
//!
//! The system turn is kept apart from the stored turns and is always sent
//! first. Two independent mechanisms keep the history within budget:
//!
//! - **Compression** happens in [`ContextMemory::build_messages`] and only
//!   affects the outbound copy.
//! - **Pruning** ([`ContextMemory::prune`]) permanently replaces the middle of
//!   the history with a single marker turn.
//!
//! A hard cap on the number of stored turns applies on every append, and
//! every mutation writes the full list through the [`HistoryStore`].

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use kestrel_core::config::MemoryConfig;
use kestrel_core::types::TOOL_ERROR_MARKER;
use kestrel_core::utils::{head_chars, tail_chars};
use kestrel_core::{HistoryStore, Message, Role, ToolCall, ToolResult};

/// Fixed ratio used for the token estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Pruning starts once the estimate exceeds this share of the budget.
pub const PRUNE_THRESHOLD: f64 = 0.8;

/// The newest turns are never compressed.
const KEEP_RECENT_UNCOMPRESSED: usize = 3;

/// Every pruning marker turn starts with this text.
pub const PRUNE_MARKER_PREFIX: &str = "[Earlier conversation pruned:";

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid blank-run pattern"))
}

/// Whether `turn` is a marker inserted by [`ContextMemory::prune`].
pub fn is_prune_marker(turn: &Message) -> bool {
    turn.role() == Role::User && turn.text().starts_with(PRUNE_MARKER_PREFIX)
}

/// Shrink one oversized turn's text for sending.
///
/// Blank-line runs collapse to a single blank line first; if the text is
/// still above `threshold` and is not itself an error report (opening with
/// the error marker) it becomes a head slice and a tail slice around an
/// elision note.
pub fn compress_text(text: &str, threshold: usize) -> String {
    let collapsed = blank_runs().replace_all(text, "\n\n");
    let len = collapsed.chars().count();
    if len <= threshold || collapsed.trim_start().starts_with(TOOL_ERROR_MARKER) {
        return collapsed.into_owned();
    }
    let head = head_chars(&collapsed, threshold / 2);
    let tail = tail_chars(&collapsed, threshold / 4);
    let elided = len - head.chars().count() - tail.chars().count();
    format!("{head}\n\n[... {elided} characters elided ...]\n\n{tail}")
}

// ─────────────────────────────────────────────
// ContextMemory
// ─────────────────────────────────────────────

/// Conversation history for one session.
pub struct ContextMemory {
    session_id: String,
    system: String,
    turns: Vec<Message>,
    store: Option<HistoryStore>,
    config: MemoryConfig,
}

impl ContextMemory {
    /// In-memory history with nothing persisted.
    pub fn new(
        session_id: impl Into<String>,
        system: impl Into<String>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            system: system.into(),
            turns: Vec::new(),
            store: None,
            config,
        }
    }

    /// History backed by `store`, restored from whatever it holds for this
    /// session id.
    pub fn with_store(mut self, store: HistoryStore) -> Self {
        self.turns = store.load(&self.session_id);
        self.store = Some(store);
        if self.turns.len() > self.config.max_turns {
            self.enforce_cap();
            self.persist();
        }
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn set_system(&mut self, system: impl Into<String>) {
        self.system = system.into();
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.turns.last()
    }

    // ────────────── Mutation ──────────────

    /// Append a turn, enforce the hard cap, and persist.
    pub fn push(&mut self, turn: Message) {
        self.turns.push(turn);
        self.enforce_cap();
        self.persist();
    }

    pub fn add_user(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    pub fn add_assistant(&mut self, text: impl Into<String>) {
        self.push(Message::assistant(text));
    }

    pub fn add_assistant_tool_calls(&mut self, text: impl Into<String>, calls: Vec<ToolCall>) {
        self.push(Message::assistant_tool_calls(text, calls));
    }

    pub fn add_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.push(Message::tool_result(tool_call_id, content));
    }

    /// Record a dispatch outcome, failed or not.
    pub fn add_tool_outcome(&mut self, tool_call_id: impl Into<String>, result: &ToolResult) {
        self.push(Message::tool_outcome(tool_call_id, result));
    }

    /// Drop every stored turn.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.persist();
        info!(session = %self.session_id, "history cleared");
    }

    fn enforce_cap(&mut self) {
        let max = self.config.max_turns.max(1);
        if self.turns.len() > max {
            let excess = self.turns.len() - max;
            self.turns.drain(..excess);
            debug!(session = %self.session_id, dropped = excess, "hard cap reached");
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            store.save(&self.session_id, &self.turns);
        }
    }

    // ────────────── Budget ──────────────

    /// Approximate token count of the system turn plus all stored turns.
    pub fn estimate_tokens(&self) -> usize {
        let chars: usize = self.system.chars().count()
            + self.turns.iter().map(Message::char_len).sum::<usize>();
        chars / CHARS_PER_TOKEN
    }

    /// Whether the estimate is above the pruning threshold of `budget`.
    pub fn needs_pruning(&self, budget: usize) -> bool {
        self.estimate_tokens() as f64 > budget as f64 * PRUNE_THRESHOLD
    }

    /// Replace the middle of the history with one marker turn.
    ///
    /// Keeps `prune_fraction` of the turns, about a third from the start and
    /// the rest from the end. Block edges are moved so that no tool-result
    /// turn is separated from the assistant turn that requested it. Returns
    /// the number of turns dropped; histories shorter than `min_prune_turns`
    /// are left alone.
    pub fn prune(&mut self) -> usize {
        // Earlier markers are folded into the new one.
        let previously: usize = self
            .turns
            .iter()
            .filter(|t| is_prune_marker(t))
            .filter_map(|t| marker_count(t.text()))
            .sum();
        let turns: Vec<Message> = self
            .turns
            .iter()
            .filter(|t| !is_prune_marker(t))
            .cloned()
            .collect();

        let len = turns.len();
        if len < self.config.min_prune_turns.max(2) {
            return 0;
        }

        let fraction = self.config.prune_fraction.clamp(0.0, 1.0);
        let keep = ((len as f64 * fraction).ceil() as usize).clamp(2, len);
        let mut head_end = (keep / 3).max(1);
        let mut tail_start = len - (keep - head_end);

        // Tool results stay with the call that produced them.
        while head_end < tail_start && turns[head_end].role() == Role::Tool {
            head_end += 1;
        }
        while tail_start < len && turns[tail_start].role() == Role::Tool {
            tail_start += 1;
        }
        if head_end >= tail_start {
            return 0;
        }

        let dropped = tail_start - head_end;
        let marker = Message::user(format!(
            "{PRUNE_MARKER_PREFIX} {} turns were removed to stay within the context budget.]",
            dropped + previously
        ));

        let mut kept = Vec::with_capacity(head_end + 1 + (len - tail_start));
        kept.extend_from_slice(&turns[..head_end]);
        kept.push(marker);
        kept.extend_from_slice(&turns[tail_start..]);
        self.turns = kept;
        self.persist();

        info!(
            session = %self.session_id,
            dropped,
            remaining = self.turns.len(),
            "pruned history"
        );
        dropped
    }

    // ────────────── Outbound ──────────────

    /// System turn, compressed history, and an optional transient turn.
    ///
    /// Tool turns at the very start of the history (left orphaned by the hard
    /// cap) are skipped.
    pub fn build_messages(&self, transient: Option<Message>) -> Vec<Message> {
        let threshold = self.config.compress_threshold;
        let start = self
            .turns
            .iter()
            .position(|t| t.role() != Role::Tool)
            .unwrap_or(self.turns.len());
        let recent_from = self.turns.len().saturating_sub(KEEP_RECENT_UNCOMPRESSED);

        let mut out = Vec::with_capacity(self.turns.len() - start + 2);
        out.push(Message::system(self.system.as_str()));
        for (i, turn) in self.turns.iter().enumerate().skip(start) {
            let protected = i >= recent_from
                || turn.role() == Role::User
                || turn.is_tool_error()
                || turn.text().chars().count() <= threshold;
            if protected {
                out.push(turn.clone());
            } else {
                out.push(turn.with_text(compress_text(turn.text(), threshold)));
            }
        }
        out.extend(transient);
        out
    }
}

fn marker_count(text: &str) -> Option<usize> {
    text.strip_prefix(PRUNE_MARKER_PREFIX)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MemoryConfig {
        MemoryConfig::default()
    }

    fn filled(n: usize) -> ContextMemory {
        let mut mem = ContextMemory::new("s1", "You are a test agent.", config());
        for i in 0..n {
            if i % 2 == 0 {
                mem.add_user(format!("question {i}"));
            } else {
                mem.add_assistant(format!("answer {i}"));
            }
        }
        mem
    }

    #[test]
    fn test_estimate_includes_system_and_tool_calls() {
        let mut mem = ContextMemory::new("s", "abcd", config());
        assert_eq!(mem.estimate_tokens(), 1);
        mem.add_user("12345678");
        assert_eq!(mem.estimate_tokens(), 3);
        mem.add_assistant_tool_calls("", vec![ToolCall::new("c1", "read", "{\"p\":1}")]);
        // "read" + {"p":1} = 4 + 7 = 11 more characters
        assert_eq!(mem.estimate_tokens(), (4 + 8 + 11) / 4);
    }

    #[test]
    fn test_prune_twenty_turns_at_half() {
        let mut mem = filled(20);
        let before: Vec<Message> = mem.turns()[13..].to_vec();

        let dropped = mem.prune();
        assert_eq!(dropped, 10);
        assert!(mem.len() < 20);
        assert_eq!(mem.turns().iter().filter(|t| is_prune_marker(t)).count(), 1);
        assert_eq!(&mem.turns()[mem.len() - 7..], before.as_slice());
        assert_eq!(mem.turns()[0].text(), "question 0");
        assert!(mem.turns()[3].text().contains(" 10 turns were removed"));
    }

    #[test]
    fn test_repeated_prune_keeps_single_marker() {
        let mut mem = filled(20);
        mem.prune();
        for i in 0..10 {
            mem.add_user(format!("more {i}"));
        }
        mem.prune();
        let markers: Vec<&Message> = mem.turns().iter().filter(|t| is_prune_marker(t)).collect();
        assert_eq!(markers.len(), 1);
        assert!(markers[0].text().starts_with(PRUNE_MARKER_PREFIX));
    }

    #[test]
    fn test_prune_skips_short_history() {
        let mut mem = filled(5);
        assert_eq!(mem.prune(), 0);
        assert_eq!(mem.len(), 5);
    }

    #[test]
    fn test_prune_keeps_tool_results_with_their_call() {
        let mut mem = ContextMemory::new("s", "sys", config());
        for i in 0..6 {
            mem.add_user(format!("task {i}"));
            mem.add_assistant_tool_calls("", vec![ToolCall::new(format!("c{i}"), "read_file", "{}")]);
            mem.add_tool_result(format!("c{i}"), "contents");
        }
        mem.prune();
        for (i, turn) in mem.turns().iter().enumerate() {
            if turn.role() == Role::Tool {
                assert!(i > 0);
                let prev = &mem.turns()[i - 1];
                assert!(
                    prev.role() == Role::Tool || !prev.tool_calls().is_empty(),
                    "orphaned tool turn at {i}"
                );
            }
        }
    }

    #[test]
    fn test_hard_cap_drops_oldest() {
        let mut cfg = config();
        cfg.max_turns = 5;
        let mut mem = ContextMemory::new("s", "sys", cfg);
        for i in 0..9 {
            mem.add_user(format!("turn {i}"));
            assert!(mem.len() <= 5);
        }
        assert_eq!(mem.len(), 5);
        assert_eq!(mem.turns()[0].text(), "turn 4");
        assert_eq!(mem.turns()[4].text(), "turn 8");
    }

    #[test]
    fn test_needs_pruning_threshold() {
        let mut mem = ContextMemory::new("s", "", config());
        mem.add_user("x".repeat(400)); // 100 tokens
        assert!(!mem.needs_pruning(125));
        assert!(mem.needs_pruning(124));
    }

    #[test]
    fn test_compress_text_collapses_then_elides() {
        let text = format!("a\n\n\n\n\nb{}", "z".repeat(50));
        let collapsed = compress_text(&text, 100);
        assert_eq!(collapsed, format!("a\n\nb{}", "z".repeat(50)));

        let long = format!("{}{}", "h".repeat(300), "t".repeat(300));
        let out = compress_text(&long, 100);
        assert!(out.starts_with(&"h".repeat(50)));
        assert!(out.ends_with(&"t".repeat(25)));
        assert!(out.contains("[... 525 characters elided ...]"));
    }

    #[test]
    fn test_compress_text_keeps_error_text() {
        let long = format!("Error: {}", "x".repeat(500));
        assert_eq!(compress_text(&long, 100), long);
    }

    #[test]
    fn test_build_messages_compresses_only_eligible_turns() {
        let mut cfg = config();
        cfg.compress_threshold = 100;
        let mut mem = ContextMemory::new("s", "sys", cfg);
        let big = "y".repeat(1_000);
        mem.add_user(big.clone());
        mem.add_assistant(big.clone());
        mem.add_tool_outcome("c1", &ToolResult::failure(big.clone()));
        mem.add_assistant(big.clone());
        mem.add_user("ok");
        mem.add_assistant(big.clone());

        let out = mem.build_messages(Some(Message::user("transient")));
        assert_eq!(out.len(), 8);
        assert_eq!(out[0], Message::system("sys"));
        assert_eq!(out[1].text(), big); // user
        assert!(out[2].text().len() < 200); // old assistant
        assert!(out[3].text().starts_with("Error:")); // tool error
        assert_eq!(out[3].text().len(), big.len() + 7);
        assert_eq!(out[4].text(), big); // within the newest three
        assert_eq!(out[6].text(), big);
        assert_eq!(out[7].text(), "transient");

        // Stored turns are untouched.
        assert_eq!(mem.turns()[1].text(), big);
    }

    #[test]
    fn test_compress_text_elides_quoted_error_lines() {
        let log = format!("{}\nError: bad input\n{}", "a".repeat(300), "b".repeat(300));
        let out = compress_text(&log, 100);
        assert!(out.contains("characters elided"));
        assert!(out.chars().count() < 200);
    }

    #[test]
    fn test_build_messages_compresses_large_tool_output() {
        let mut cfg = config();
        cfg.compress_threshold = 100;
        let mut mem = ContextMemory::new("s", "sys", cfg);
        let source = format!(
            "fn main() {{ eprintln!(\"Error: bad input\"); }}\n{}",
            "// filler\n".repeat(200)
        );
        mem.add_user("read main.rs");
        mem.add_assistant_tool_calls("", vec![ToolCall::new("c1", "read_file", "{}")]);
        mem.add_tool_outcome("c1", &ToolResult::ok(source.clone()));
        mem.add_assistant("it prints an error");
        mem.add_user("thanks");
        mem.add_assistant("sure");

        let out = mem.build_messages(None);
        assert!(!mem.turns()[2].is_tool_error());
        assert!(out[3].text().contains("characters elided"));
        assert!(out[3].text().len() < source.len());
        assert_eq!(mem.turns()[2].text(), source);
    }

    #[test]
    fn test_build_messages_skips_leading_orphans() {
        let mut cfg = config();
        cfg.max_turns = 2;
        let mut mem = ContextMemory::new("s", "sys", cfg);
        mem.add_assistant_tool_calls("", vec![ToolCall::new("c1", "read_file", "{}")]);
        mem.add_tool_result("c1", "data");
        mem.add_assistant("done");
        let out = mem.build_messages(None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].text(), "done");
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(Some(dir.path().to_path_buf())).unwrap();

        let mut mem = ContextMemory::new("persist-me", "sys", config()).with_store(store.clone());
        mem.add_user("hello");
        mem.add_assistant_tool_calls("looking", vec![ToolCall::new("c1", "list_files", "{\"path\":\".\"}")]);
        mem.add_tool_result("c1", "a.rs\nb.rs");
        mem.add_assistant("two files");

        let reloaded = ContextMemory::new("persist-me", "sys", config()).with_store(store.clone());
        assert_eq!(reloaded.turns(), mem.turns());

        mem.clear();
        let cleared = ContextMemory::new("persist-me", "sys", config()).with_store(store);
        assert!(cleared.is_empty());
    }

    #[test]
    fn test_corrupt_history_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(Some(dir.path().to_path_buf())).unwrap();
        std::fs::write(store.session_path("bad"), "{not json\n").unwrap();
        let mem = ContextMemory::new("bad", "sys", config()).with_store(store);
        assert!(mem.is_empty());
    }
}
