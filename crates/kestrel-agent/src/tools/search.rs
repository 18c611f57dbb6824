//! Code search: ranks workspace files against a free-text query.
//!
//! Ranking goes through [`ScoringStrategy`] so an embedding backend can
//! replace [`KeywordScorer`] without changing the tool contract.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use kestrel_core::utils::truncate_string;

use super::base::{optional_i64, require_string, Tool, ToolCategory};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;
const MAX_FILE_BYTES: u64 = 512 * 1024;
const MAX_FILES_SCANNED: usize = 5_000;
const LINES_PER_HIT: usize = 3;
const MAX_QUERY_TERMS: usize = 12;

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__", "dist", "build"];

// ─────────────────────────────────────────────
// Scoring
// ─────────────────────────────────────────────

/// Relevance of a document to a query. Higher is better; `0.0` means no match.
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, query: &str, path: &str, content: &str) -> f64;
}

/// Keyword-overlap scorer.
///
/// Each query term adds `ln(1 + occurrences)` for the content, a flat bonus
/// when it appears in the path, and the whole query earns a bonus when it
/// appears verbatim.
#[derive(Debug, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    const PATH_BONUS: f64 = 1.5;
    const PHRASE_BONUS: f64 = 3.0;

    /// Lower-cased query terms, de-duplicated and bounded.
    pub fn terms(query: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for token in query
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .map(str::to_lowercase)
            .filter(|t| t.chars().count() >= 2)
        {
            if !out.contains(&token) {
                out.push(token);
            }
            if out.len() >= MAX_QUERY_TERMS {
                break;
            }
        }
        out
    }
}

impl ScoringStrategy for KeywordScorer {
    fn name(&self) -> &str {
        "keyword"
    }

    fn score(&self, query: &str, path: &str, content: &str) -> f64 {
        let terms = Self::terms(query);
        if terms.is_empty() {
            return 0.0;
        }
        let content = content.to_lowercase();
        let path = path.to_lowercase();

        let mut score: f64 = terms
            .iter()
            .map(|t| {
                let hits = content.matches(t.as_str()).count() as f64;
                let in_path = if path.contains(t.as_str()) {
                    Self::PATH_BONUS
                } else {
                    0.0
                };
                (1.0 + hits).ln() + in_path
            })
            .sum();

        let phrase = query.trim().to_lowercase();
        if terms.len() > 1 && content.contains(&phrase) {
            score += Self::PHRASE_BONUS;
        }
        score
    }
}

// ─────────────────────────────────────────────
// SearchCodeTool
// ─────────────────────────────────────────────

/// Ranked search over text files under the workspace root.
pub struct SearchCodeTool {
    root: PathBuf,
    scorer: Arc<dyn ScoringStrategy>,
}

impl SearchCodeTool {
    pub fn new(root: PathBuf) -> Self {
        Self::with_scorer(root, Arc::new(KeywordScorer))
    }

    pub fn with_scorer(root: PathBuf, scorer: Arc<dyn ScoringStrategy>) -> Self {
        Self { root, scorer }
    }

    fn candidate_files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                if out.len() >= MAX_FILES_SCANNED {
                    return out;
                }
                let path = entry.path();
                let Ok(ft) = entry.file_type() else { continue };
                if ft.is_dir() {
                    let name = entry.file_name();
                    if !SKIP_DIRS.iter().any(|s| name == *s) {
                        stack.push(path);
                    }
                } else if ft.is_file()
                    && entry.metadata().map(|m| m.len() <= MAX_FILE_BYTES).unwrap_or(false)
                {
                    out.push(path);
                }
            }
        }
        out
    }

    /// Lines containing any query term, for display under a hit.
    fn matching_lines(content: &str, terms: &[String]) -> Vec<String> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| {
                let lower = line.to_lowercase();
                terms.iter().any(|t| lower.contains(t.as_str()))
            })
            .take(LINES_PER_HIT)
            .map(|(i, line)| format!("  L{}: {}", i + 1, truncate_string(line.trim(), 160)))
            .collect()
    }

    fn search(&self, query: &str, limit: usize) -> Vec<(f64, String, Vec<String>)> {
        let terms = KeywordScorer::terms(query);
        let mut hits: Vec<(f64, String, Vec<String>)> = self
            .candidate_files()
            .into_iter()
            .filter_map(|path| {
                // Binary and non-UTF-8 files are skipped.
                let content = std::fs::read_to_string(&path).ok()?;
                let rel = relative(&self.root, &path);
                let score = self.scorer.score(query, &rel, &content);
                (score > 0.0).then(|| (score, rel, Self::matching_lines(&content, &terms)))
            })
            .collect();

        hits.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        hits.truncate(limit);
        hits
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search the workspace for files relevant to a query. Returns ranked paths \
         with a few matching lines each."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Identifiers or words to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of files to return (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        if KeywordScorer::terms(&query).is_empty() {
            anyhow::bail!("Invalid format: query must contain at least one word");
        }
        let limit = optional_i64(&params, "limit")
            .map(|l| l.clamp(1, MAX_LIMIT as i64) as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let hits = self.search(&query, limit);
        debug!(query = %query, scorer = self.scorer.name(), hits = hits.len(), "code search");

        if hits.is_empty() {
            return Ok(format!("No files match '{query}'"));
        }
        let blocks: Vec<String> = hits
            .into_iter()
            .map(|(score, path, lines)| {
                let mut block = format!("{path} (score {score:.2})");
                for line in lines {
                    block.push('\n');
                    block.push_str(&line);
                }
                block
            })
            .collect();
        Ok(blocks.join("\n"))
    }
}
