//! `kestrel history`: list, show, or clear stored sessions.

use anyhow::Result;
use colored::Colorize;

use kestrel_core::config::load_config;
use kestrel_core::utils::truncate_string;
use kestrel_core::{HistoryStore, Message, Role};

const PREVIEW_CHARS: usize = 200;

/// Run the history command.
pub fn run(session: Option<&str>, clear: bool) -> Result<()> {
    let config = load_config(None);
    let store = crate::helpers::history_store(&config)?;

    match (session, clear) {
        (Some(id), true) => {
            if store.delete(id) {
                println!("{}", format!("deleted session '{id}'").green());
            } else {
                println!("{}", format!("no stored session '{id}'").dimmed());
            }
        }
        (Some(id), false) => show(&store, id),
        (None, _) => list(&store),
    }
    Ok(())
}

fn list(store: &HistoryStore) {
    let sessions = store.list();
    if sessions.is_empty() {
        println!("{}", "no stored sessions".dimmed());
        return;
    }
    for s in sessions {
        println!(
            "  {:<24} {:>5} turns  {}",
            s.session_id,
            s.turns,
            s.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
}

fn show(store: &HistoryStore, id: &str) {
    let turns = store.load(id);
    if turns.is_empty() {
        println!("{}", format!("session '{id}' is empty").dimmed());
        return;
    }
    for turn in &turns {
        println!("{}", describe(turn));
    }
}

/// One-line rendering of a stored turn.
fn describe(turn: &Message) -> String {
    let text = truncate_string(&turn.text().replace('\n', " "), PREVIEW_CHARS);
    match turn.role() {
        Role::User => format!("{} {text}", "user     ".cyan()),
        Role::Assistant if !turn.tool_calls().is_empty() => {
            let names: Vec<&str> = turn
                .tool_calls()
                .iter()
                .map(|c| c.function.name.as_str())
                .collect();
            format!("{} calls {}", "assistant".blue(), names.join(", "))
        }
        Role::Assistant => format!("{} {text}", "assistant".blue()),
        Role::Tool if turn.is_tool_error() => format!("{} {text}", "tool     ".red()),
        Role::Tool => format!("{} {text}", "tool     ".dimmed()),
        Role::System => format!("{} {text}", "system   ".dimmed()),
    }
}
