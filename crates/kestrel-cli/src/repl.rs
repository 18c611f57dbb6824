//! Interactive REPL.
//!
//! Uses `rustyline` for readline-style editing with persistent history.
//! Lines starting with `/` are session commands; everything else is a task.

use anyhow::Result;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use kestrel_core::Mode;

use crate::helpers::{self, Runtime};

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

const HELP: &str = "\
/mode            show the current mode
/mode <mode>     switch mode (auto, reason, code, build, debug, optimize, docs)
/model <id>      lock every call to a model
/model auto      unlock the model and route again
/clear           forget this session's history
/usage           token usage so far
exit             leave";

/// A parsed slash command.
#[derive(Debug, PartialEq)]
enum Command {
    ShowMode,
    SetMode(Mode),
    LockModel(String),
    UnlockModel,
    Clear,
    Usage,
    Help,
    Invalid(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let rest = line.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();

    let command = match (name, arg) {
        ("mode", None) => Command::ShowMode,
        ("mode", Some(m)) => match m.parse::<Mode>() {
            Ok(mode) => Command::SetMode(mode),
            Err(e) => Command::Invalid(e.to_string()),
        },
        ("model", Some("auto")) => Command::UnlockModel,
        ("model", Some(id)) => Command::LockModel(id.to_string()),
        ("model", None) => Command::Invalid("usage: /model <id> | /model auto".into()),
        ("clear", _) => Command::Clear,
        ("usage", _) => Command::Usage,
        ("help", _) => Command::Help,
        (other, _) => Command::Invalid(format!("unknown command '/{other}' (try /help)")),
    };
    Some(command)
}

fn apply(command: Command, rt: &mut Runtime) {
    match command {
        Command::ShowMode => {
            let model = rt.session.locked_model().unwrap_or("routed");
            println!("mode {} · model {}", rt.session.mode(), model);
        }
        Command::SetMode(mode) => {
            rt.session.set_mode(mode);
            println!("{}", format!("mode set to {mode}").green());
        }
        Command::LockModel(id) => {
            println!("{}", format!("model locked to {id}").green());
            rt.session.lock_model(id);
        }
        Command::UnlockModel => {
            rt.session.unlock_model();
            println!("{}", "model unlocked; routing by mode".green());
        }
        Command::Clear => {
            rt.memory.clear();
            println!("{}", "history cleared".green());
        }
        Command::Usage => {
            let usage = rt.session.usage();
            println!(
                "{} requests · {} prompt + {} completion = {} tokens · ~{} tokens in history",
                usage.requests,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total(),
                rt.memory.estimate_tokens()
            );
        }
        Command::Help => println!("{HELP}"),
        Command::Invalid(msg) => eprintln!("{}", msg.red()),
    }
}

/// Run the interactive REPL loop.
pub async fn run(mut rt: Runtime) -> Result<()> {
    helpers::print_banner(rt.memory.session_id(), rt.session.mode());

    let mut editor = create_editor()?;

    loop {
        let input = match editor.readline("you> ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_command(trimmed) {
            println!("\nGoodbye!");
            break;
        }
        let _ = editor.add_history_entry(&input);

        if let Some(command) = parse_command(trimmed) {
            apply(command, &mut rt);
            continue;
        }

        debug!(session = rt.memory.session_id(), input = trimmed, "running task");
        println!();
        match rt.run_task(trimmed).await {
            Ok(result) => helpers::print_footer(&result),
            Err(e) => eprintln!("\n{} {e:#}\n", "Error:".red().bold()),
        }
    }

    save_history(&mut editor);
    Ok(())
}

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded REPL history from {}", history_path.display());
    }

    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

fn history_path() -> std::path::PathBuf {
    kestrel_core::utils::get_data_path().join("history").join("cli_history")
}

fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
