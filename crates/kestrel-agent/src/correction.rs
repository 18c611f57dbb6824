//! Self-correction hints for failed tool calls.
//!
//! Classification is a heuristic: an ordered table of substring predicates
//! over the lower-cased error text, first match wins. Swap the table to
//! change the policy; nothing else depends on how a category was chosen.

use std::fmt;

use kestrel_core::types::TOOL_ERROR_MARKER;

/// Coarse class of a tool failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A path or resource does not exist.
    Context,
    /// The action was refused.
    Safety,
    /// Content or format did not match what the tool expected.
    Precision,
    General,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Context => "CONTEXT",
            ErrorCategory::Safety => "SAFETY",
            ErrorCategory::Precision => "PRECISION",
            ErrorCategory::General => "GENERAL",
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            ErrorCategory::Context => {
                "The target does not exist. Locate it first (list_files or search_code) before retrying."
            }
            ErrorCategory::Safety => {
                "The action was refused. Choose a permitted alternative inside the workspace."
            }
            ErrorCategory::Precision => {
                "The input did not match. Re-read the current content and use it exactly."
            }
            ErrorCategory::General => "Diagnose the error message before acting again.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered predicate table.
const RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Context,
        &["not found", "no such file", "does not exist", "enoent", "cannot find", "unknown tool"],
    ),
    (
        ErrorCategory::Safety,
        &["permission denied", "eacces", "not permitted", "access denied", "blocked"],
    ),
    (
        ErrorCategory::Precision,
        &[
            "mismatch",
            "does not match",
            "invalid format",
            "invalid arguments",
            "parse error",
            "expected",
            "occurrences",
        ],
    ),
];

/// Classify a tool-error turn's text.
pub fn classify_error(text: &str) -> ErrorCategory {
    let lower = text.to_lowercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::General)
}

/// Transient instruction appended after a tool-error turn.
pub fn correction_instruction(error_text: &str) -> String {
    let category = classify_error(error_text);
    let detail = error_text
        .trim_start_matches(TOOL_ERROR_MARKER)
        .trim();
    format!(
        "[Self-correction: {category}] The previous tool call failed: {detail}\n{} \
         Do not repeat the failed call with the same arguments.",
        category.guidance()
    )
}

/// Permanent instruction appended when the build-mode test run fails.
pub fn test_failure_instruction(output: &str) -> String {
    format!(
        "[Test failure] The test suite failed after your last change. Fix the cause before \
         continuing.\n\n{output}"
    )
}
