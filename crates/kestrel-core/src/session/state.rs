//! Per-session mutable state: mode, model lock, usage counters.
//!
//! Owned by whoever drives the agent loop and passed to it by `&mut`, so a
//! session can only ever have one run in flight. Changes are announced on an
//! optional channel supplied by the caller.

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::mode::Mode;
use crate::types::UsageInfo;

/// Change notification emitted by [`SessionState`].
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    ModeChanged(Mode),
    ModelLocked(String),
    ModelUnlocked,
    UsageRecorded(TokenUsage),
}

/// Running token totals for a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Mode, model override and counters for one session.
///
/// Invariant: `model_locked` implies `active_model.is_some()`. The only way
/// to set either is through [`lock_model`](Self::lock_model) /
/// [`unlock_model`](Self::unlock_model).
#[derive(Debug, Default)]
pub struct SessionState {
    mode: Mode,
    active_model: Option<String>,
    model_locked: bool,
    usage: TokenUsage,
    /// Iterations of the current (or last) run.
    pub iterations: usize,
    notifier: Option<UnboundedSender<SessionEvent>>,
}

impl SessionState {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Attach a channel that receives every state change.
    pub fn with_notifier(mut self, tx: UnboundedSender<SessionEvent>) -> Self {
        self.notifier = Some(tx);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            self.mode = mode;
            self.emit(SessionEvent::ModeChanged(mode));
        }
    }

    /// The locked model, if any.
    pub fn locked_model(&self) -> Option<&str> {
        if self.model_locked {
            self.active_model.as_deref()
        } else {
            None
        }
    }

    pub fn is_model_locked(&self) -> bool {
        self.model_locked
    }

    /// Pin every subsequent run to `model`.
    pub fn lock_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        self.active_model = Some(model.clone());
        self.model_locked = true;
        self.emit(SessionEvent::ModelLocked(model));
    }

    /// Clear the lock and the model with it.
    pub fn unlock_model(&mut self) {
        let was_locked = self.model_locked;
        self.active_model = None;
        self.model_locked = false;
        if was_locked {
            self.emit(SessionEvent::ModelUnlocked);
        }
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Fold one response's usage into the running totals.
    pub fn record_usage(&mut self, usage: &UsageInfo) {
        self.usage.prompt_tokens += u64::from(usage.prompt_tokens);
        self.usage.completion_tokens += u64::from(usage.completion_tokens);
        self.usage.requests += 1;
        self.emit(SessionEvent::UsageRecorded(self.usage));
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.notifier {
            if tx.send(event).is_err() {
                debug!("session event receiver dropped");
            }
        }
    }
}
