//! Typed provider failures.

use std::time::Duration;

/// Substrings (lower-cased) that mark a capacity, quota or rate-limit failure.
const CAPACITY_SIGNATURES: &[&str] = &[
    "quota",
    "rate limit",
    "rate_limit",
    "overloaded",
    "insufficient",
    "capacity",
    "credit",
    "limit exceeded",
];

/// HTTP statuses that always indicate capacity exhaustion.
const CAPACITY_STATUSES: &[u16] = &[402, 429];

/// Failure of a single provider call.
///
/// Only [`ProviderError::Capacity`] is recoverable by the agent loop (one
/// fallback-model retry); every other variant propagates to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network-level failure before or during the stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The whole call exceeded its deadline.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success initial status.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Non-success status recognized as quota or capacity exhaustion.
    #[error("provider capacity exhausted ({status}): {message}")]
    Capacity { status: u16, message: String },
}

impl ProviderError {
    /// Build the typed error for a non-success status and raw response body.
    ///
    /// JSON bodies of the form `{"error":{"message":..}}` contribute their
    /// message; anything else is carried verbatim.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body);
        if is_capacity_signature(status, &message) {
            ProviderError::Capacity { status, message }
        } else {
            ProviderError::Api { status, message }
        }
    }

    /// Whether this failure should trigger a fallback-model retry.
    pub fn is_capacity(&self) -> bool {
        matches!(self, ProviderError::Capacity { .. })
    }

    /// The HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } | ProviderError::Capacity { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

fn extract_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .or_else(|| v.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| body.trim().to_string())
}

fn is_capacity_signature(status: u16, message: &str) -> bool {
    if CAPACITY_STATUSES.contains(&status) {
        return true;
    }
    let lower = message.to_lowercase();
    CAPACITY_SIGNATURES.iter().any(|sig| lower.contains(sig))
}
