//! Turn-history persistence, one JSONL file per session id.
//!
//! File format: `~/.kestrel/sessions/{encoded_id}.jsonl`, where the id is
//! percent-encoded so distinct ids never share a file.
//! - Line 1: `{"_type":"metadata","session_id":"...","updated_at":"...","turns":N}`
//! - Line 2+: one serialized [`Message`] per line, in order.
//!
//! Persistence is best-effort: write failures are logged and swallowed, and
//! a missing or corrupt file loads as an empty history.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Message;
use crate::utils;

/// Metadata header written as the first line of each history file.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryHeader {
    #[serde(rename = "_type")]
    record_type: String,
    session_id: String,
    updated_at: DateTime<Utc>,
    turns: usize,
}

/// Summary of a stored session for listing purposes.
#[derive(Clone, Debug)]
pub struct HistorySummary {
    pub session_id: String,
    pub updated_at: DateTime<Utc>,
    pub turns: usize,
    pub path: PathBuf,
}

/// Reads and writes full turn lists keyed by session id.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    sessions_dir: PathBuf,
}

impl HistoryStore {
    /// Create a store rooted at `sessions_dir` (default `~/.kestrel/sessions/`).
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(sessions_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.unwrap_or_else(utils::get_sessions_path);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { sessions_dir: dir })
    }

    /// Overwrite the stored history for `session_id`. Failures are logged.
    pub fn save(&self, session_id: &str, turns: &[Message]) {
        if let Err(e) = self.write_file(session_id, turns) {
            warn!(session = session_id, error = %e, "failed to persist history");
        }
    }

    /// Load the stored history. Missing or unreadable files yield an empty list.
    pub fn load(&self, session_id: &str) -> Vec<Message> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Vec::new();
        }
        match self.read_file(&path, session_id) {
            Ok(turns) => {
                debug!(session = session_id, turns = turns.len(), "loaded history");
                turns
            }
            Err(e) => {
                warn!(
                    session = session_id,
                    path = %path.display(),
                    error = %e,
                    "corrupt history file, starting empty"
                );
                Vec::new()
            }
        }
    }

    /// Delete a session file. Returns `true` if it existed.
    pub fn delete(&self, session_id: &str) -> bool {
        let path = self.session_path(session_id);
        if !path.exists() {
            return false;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("deleted history file {}", path.display());
                true
            }
            Err(e) => {
                warn!("failed to delete history file: {}", e);
                false
            }
        }
    }

    /// All stored sessions, newest first.
    pub fn list(&self) -> Vec<HistorySummary> {
        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("failed to read sessions directory: {}", e);
                return Vec::new();
            }
        };

        let mut summaries: Vec<HistorySummary> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .filter_map(|path| {
                let file = std::fs::File::open(&path).ok()?;
                let line = std::io::BufReader::new(file).lines().next()?.ok()?;
                let header: HistoryHeader = serde_json::from_str(&line).ok()?;
                Some(HistorySummary {
                    session_id: header.session_id,
                    updated_at: header.updated_at,
                    turns: header.turns,
                    path,
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// The JSONL file path for a session id.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        let stem = utils::encode_filename(session_id);
        self.sessions_dir.join(format!("{stem}.jsonl"))
    }

    fn write_file(&self, session_id: &str, turns: &[Message]) -> std::io::Result<()> {
        let path = self.session_path(session_id);
        let tmp = path.with_extension("jsonl.tmp");

        {
            let mut file = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
            let header = HistoryHeader {
                record_type: "metadata".to_string(),
                session_id: session_id.to_string(),
                updated_at: Utc::now(),
                turns: turns.len(),
            };
            writeln!(file, "{}", serde_json::to_string(&header)?)?;
            for turn in turns {
                writeln!(file, "{}", serde_json::to_string(turn)?)?;
            }
            file.flush()?;
        }
        std::fs::rename(&tmp, &path)?;

        debug!(
            session = session_id,
            turns = turns.len(),
            path = %path.display(),
            "saved history"
        );
        Ok(())
    }

    fn read_file(&self, path: &Path, session_id: &str) -> anyhow::Result<Vec<Message>> {
        let file = std::fs::File::open(path)?;
        let mut lines = std::io::BufReader::new(file).lines();

        let header: HistoryHeader = match lines.next() {
            Some(line) => serde_json::from_str(&line?)?,
            None => return Ok(Vec::new()),
        };
        if header.record_type != "metadata" {
            anyhow::bail!("missing metadata header");
        }
        if header.session_id != session_id {
            anyhow::bail!("file belongs to session '{}'", header.session_id);
        }

        let mut turns = Vec::with_capacity(header.turns);
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            turns.push(serde_json::from_str::<Message>(&line)?);
        }
        Ok(turns)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use tempfile::tempdir;

    fn make_store() -> (HistoryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(Some(dir.path().to_path_buf())).unwrap();
        (store, dir)
    }

    fn sample_turns() -> Vec<Message> {
        vec![
            Message::user("list files in the project"),
            Message::assistant_tool_calls(
                "Let me look.",
                vec![ToolCall::new("call_1", "list_files", r#"{"path":"."}"#)],
            ),
            Message::tool_result("call_1", "Cargo.toml\nsrc/"),
            Message::assistant("There are two entries."),
        ]
    }

    #[test]
    fn test_save_then_load_reproduces_list() {
        let (store, _dir) = make_store();
        let turns = sample_turns();
        store.save("cli:default", &turns);
        assert_eq!(store.load("cli:default"), turns);
    }

    #[test]
    fn test_reload_from_fresh_store() {
        let dir = tempdir().unwrap();
        let turns = sample_turns();
        {
            let store = HistoryStore::new(Some(dir.path().to_path_buf())).unwrap();
            store.save("s1", &turns);
        }
        let store = HistoryStore::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(store.load("s1"), turns);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (store, _dir) = make_store();
        assert!(store.load("never-saved").is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let (store, _dir) = make_store();
        std::fs::write(store.session_path("bad"), "{this is not json\n").unwrap();
        assert!(store.load("bad").is_empty());
    }

    #[test]
    fn test_corrupt_turn_line_is_empty() {
        let (store, _dir) = make_store();
        store.save("half", &sample_turns());
        let path = store.session_path("half");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"role\":\"wizard\"}\n");
        std::fs::write(&path, content).unwrap();
        assert!(store.load("half").is_empty());
    }

    #[test]
    fn test_file_format_has_header_then_turns() {
        let (store, dir) = make_store();
        store.save("cli:local", &[Message::user("test message")]);

        let content = std::fs::read_to_string(dir.path().join("cli%3Alocal.jsonl")).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);

        let header: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header["_type"], "metadata");
        assert_eq!(header["session_id"], "cli:local");
        assert_eq!(header["turns"], 1);

        let turn: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(turn["role"], "user");
        assert_eq!(turn["content"], "test message");
    }

    #[test]
    fn test_similar_ids_do_not_share_history() {
        let (store, _dir) = make_store();
        store.save("team:alpha", &[Message::user("secret alpha plan")]);
        assert!(store.load("team_alpha").is_empty());
        assert!(store.load("team/alpha").is_empty());
        assert_eq!(store.load("team:alpha").len(), 1);
    }

    #[test]
    fn test_header_must_match_requested_id() {
        let (store, _dir) = make_store();
        store.save("owner", &[Message::user("mine")]);
        std::fs::copy(store.session_path("owner"), store.session_path("intruder")).unwrap();
        assert!(store.load("intruder").is_empty());
    }

    #[test]
    fn test_delete_and_list() {
        let (store, _dir) = make_store();
        store.save("a", &[Message::user("1")]);
        store.save("b", &[Message::user("1"), Message::user("2")]);

        let ids: Vec<String> = store.list().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a".to_string()));

        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert_eq!(store.list().len(), 1);
    }
}
