//! Filesystem tools: read, list, write, edit.
//!
//! Relative paths resolve against the workspace root. With `restrict` set,
//! any path that resolves outside the root is refused.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{optional_bool, optional_string, require_string, Tool, ToolCategory};

/// Entries returned by a recursive listing before it stops.
const MAX_LIST_ENTRIES: usize = 500;

/// Directories never descended into by a recursive listing.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

// ─────────────────────────────────────────────
// Shared path scope
// ─────────────────────────────────────────────

/// Workspace root plus the restriction policy shared by file tools.
#[derive(Clone, Debug)]
pub struct FsScope {
    root: PathBuf,
    restrict: bool,
}

impl FsScope {
    pub fn new(root: impl Into<PathBuf>, restrict: bool) -> Self {
        Self {
            root: root.into(),
            restrict,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path against the root.
    ///
    /// Returns `Err` if restriction is on and the path escapes the root.
    pub fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        // Canonicalize if the path exists; for new files canonicalize the parent.
        let resolved = if joined.exists() {
            joined.canonicalize().unwrap_or(joined)
        } else {
            match (joined.parent(), joined.file_name()) {
                (Some(parent), Some(name)) if parent.exists() => parent
                    .canonicalize()
                    .unwrap_or_else(|_| parent.to_path_buf())
                    .join(name),
                _ => joined,
            }
        };

        if self.restrict {
            let root = self
                .root
                .canonicalize()
                .unwrap_or_else(|_| self.root.clone());
            if !resolved.starts_with(&root) {
                anyhow::bail!(
                    "Access denied: path '{}' is outside the workspace '{}'",
                    resolved.display(),
                    root.display()
                );
            }
        }

        Ok(resolved)
    }
}

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

/// `read_file`: whole-file read.
pub struct ReadFileTool {
    scope: FsScope,
}

impl ReadFileTool {
    pub fn new(scope: FsScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Return the full text of a workspace file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace root"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let rel = require_string(&params, "path")?;
        let path = self.scope.resolve(&rel)?;

        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
        if !path.is_file() {
            anyhow::bail!("Not a file: {}", path.display());
        }

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))
    }
}

// ─────────────────────────────────────────────
// ListFilesTool
// ─────────────────────────────────────────────

/// Lists a directory, optionally recursively.
pub struct ListFilesTool {
    scope: FsScope,
}

impl ListFilesTool {
    pub fn new(scope: FsScope) -> Self {
        Self { scope }
    }

    fn collect(dir: &Path, base: &Path, recursive: bool, out: &mut Vec<String>) -> anyhow::Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| anyhow::anyhow!("Failed to read directory {}: {e}", dir.display()))?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if out.len() >= MAX_LIST_ENTRIES {
                return Ok(());
            }
            let path = entry.path();
            let rel = path.strip_prefix(base).unwrap_or(&path).display().to_string();
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if is_dir {
                out.push(format!("{rel}/"));
                let name = entry.file_name();
                let skip = SKIP_DIRS.iter().any(|s| name == *s);
                if recursive && !skip {
                    Self::collect(&path, base, recursive, out)?;
                }
            } else {
                out.push(rel);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a directory. Directories end with '/'. \
         Set `recursive` to walk subdirectories (build and VCS folders are skipped)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (defaults to the workspace root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Walk subdirectories"
                }
            }
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = optional_string(&params, "path").unwrap_or_else(|| ".".into());
        let recursive = optional_bool(&params, "recursive");
        let path = self.scope.resolve(&path_str)?;

        if !path.exists() {
            anyhow::bail!("Directory not found: {}", path.display());
        }
        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", path.display());
        }

        let mut entries = Vec::new();
        Self::collect(&path, &path, recursive, &mut entries)?;

        if entries.is_empty() {
            return Ok("(empty directory)".into());
        }
        let mut listing = entries.join("\n");
        if entries.len() >= MAX_LIST_ENTRIES {
            listing.push_str(&format!("\n... (stopped after {MAX_LIST_ENTRIES} entries)"));
        }
        Ok(listing)
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

/// `write_file`: create or replace a file.
pub struct WriteFileTool {
    scope: FsScope,
}

impl WriteFileTool {
    pub fn new(scope: FsScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or replace a workspace file with the given text. \
         Missing parent directories are created."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path for the file, relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Full new file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let rel = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        let path = self.scope.resolve(&rel)?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow::anyhow!("Failed to create directory {}: {e}", parent.display())
                })?;
            }
        }

        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

/// Replaces one exact text snippet within a file.
pub struct EditFileTool {
    scope: FsScope,
}

impl EditFileTool {
    pub fn new(scope: FsScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing `old_text` with `new_text`. `old_text` must match the file \
         exactly and occur once; include surrounding lines to make it unique."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to modify, relative to the workspace"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Edit
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let rel = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;
        let path = self.scope.resolve(&rel)?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }
        if old_text.is_empty() {
            anyhow::bail!("Invalid format: old_text must not be empty");
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

        match content.matches(&old_text).count() {
            0 => anyhow::bail!("old_text does not match any text in {}", path.display()),
            1 => {}
            n => anyhow::bail!(
                "old_text mismatch: found {n} occurrences in {}; add context to make it unique",
                path.display()
            ),
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        tokio::fs::write(&path, &updated)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;

        Ok(format!("Edited {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
