//! Operating modes: the posture that governs default model choice.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operating mode of a session.
///
/// `Auto` means "classify every task"; any other value pins the mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Auto,
    Reason,
    Code,
    Build,
    Debug,
    Optimize,
    Docs,
}

impl Mode {
    /// Every mode, `Auto` first.
    pub const ALL: [Mode; 7] = [
        Mode::Auto,
        Mode::Reason,
        Mode::Code,
        Mode::Build,
        Mode::Debug,
        Mode::Optimize,
        Mode::Docs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Reason => "reason",
            Mode::Code => "code",
            Mode::Build => "build",
            Mode::Debug => "debug",
            Mode::Optimize => "optimize",
            Mode::Docs => "docs",
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Mode::Auto)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown mode '{0}' (expected one of: auto, reason, code, build, debug, optimize, docs)")]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .ok_or(ParseModeError(s.to_string()))
    }
}
