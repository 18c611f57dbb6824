//! Shared CLI helpers: runtime assembly, event rendering, path expansion.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use kestrel_agent::{
    build_system_prompt, builtin_dispatcher, AgentEvent, AgentLoop, AgentLoopConfig,
    AgentRunResult, CommandTestRunner, ContextMemory, IntentRouter,
};
use kestrel_core::config::Config;
use kestrel_core::{HistoryStore, Mode, SessionState};
use kestrel_providers::create_provider;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// History store at the configured location (default `~/.kestrel/sessions`).
pub fn history_store(config: &Config) -> Result<HistoryStore> {
    let dir = config.memory.sessions_dir.as_deref().map(expand_tilde);
    HistoryStore::new(dir).context("failed to open the sessions directory")
}

// ─────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────

/// Everything one CLI session needs to run tasks.
pub struct Runtime {
    pub agent: AgentLoop,
    pub memory: ContextMemory,
    pub session: SessionState,
    events: UnboundedReceiver<AgentEvent>,
}

impl Runtime {
    /// Assemble provider, tools, router, memory and session from config.
    ///
    /// CLI `mode` / `model` take precedence over the config values.
    pub fn build(
        config: &Config,
        session_id: &str,
        mode: Option<Mode>,
        model: Option<String>,
    ) -> Result<Self> {
        let workspace = expand_tilde(&config.agent.workspace);
        if !workspace.is_dir() {
            anyhow::bail!("workspace does not exist: {}", workspace.display());
        }

        let router = IntentRouter::from_config(&config.models);
        let provider = create_provider(config, router.default_model(Mode::Code))?;
        let tools = builtin_dispatcher(&workspace, true, config.agent.timeout_secs);
        let system = build_system_prompt(&workspace, &tools.tool_names());

        let (tx, events) = unbounded_channel();
        let mut agent = AgentLoop::new(
            Arc::new(provider),
            tools,
            router,
            AgentLoopConfig::from_agent_config(&config.agent),
        )
        .with_events(tx);
        if let Some(command) = &config.agent.test_command {
            agent = agent.with_test_runner(Arc::new(CommandTestRunner::new(
                command.as_str(),
                workspace.clone(),
            )));
        }

        let memory = ContextMemory::new(session_id, system, config.memory.clone())
            .with_store(history_store(config)?);

        let mut session = SessionState::new(mode.unwrap_or(config.agent.mode));
        if let Some(model) = model.or_else(|| config.agent.model.clone()) {
            session.lock_model(model);
        }

        Ok(Self {
            agent,
            memory,
            session,
            events,
        })
    }

    /// Run one task, rendering events while it progresses.
    pub async fn run_task(&mut self, task: &str) -> Result<AgentRunResult> {
        let Runtime {
            agent,
            memory,
            session,
            events,
        } = self;

        let run = agent.run(task, memory, session);
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = events.recv() => render_event(&event),
            }
        };
        while let Ok(event) = events.try_recv() {
            render_event(&event);
        }
        result
    }
}

// ─────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::TextDelta(delta) => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolStarted { name, .. } => {
            eprintln!("\n{}", format!("  → {name}").dimmed());
        }
        AgentEvent::ToolFinished {
            name,
            success,
            attempts,
            ..
        } => {
            let mark = if *success { "✓".green() } else { "✗".red() };
            if *attempts > 1 {
                eprintln!("  {mark} {name} {}", format!("({attempts} attempts)").dimmed());
            } else {
                eprintln!("  {mark} {name}");
            }
        }
        AgentEvent::Notice(text) => eprintln!("\n{}", text.yellow()),
        AgentEvent::StateChanged(_) => {}
    }
}

/// Print the one-line run summary after streamed output.
pub fn print_footer(result: &AgentRunResult) {
    println!();
    if !result.completed {
        println!("{}", result.text.yellow());
    }
    println!(
        "{}",
        format!(
            "[{} · {} · {} iteration{} · {:.1}s]",
            result.mode,
            result.model,
            result.iterations,
            if result.iterations == 1 { "" } else { "s" },
            result.elapsed.as_secs_f64()
        )
        .dimmed()
    );
    println!();
}

/// Print the banner shown at REPL start.
pub fn print_banner(session_id: &str, mode: Mode) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "Kestrel".cyan().bold(), version.dimmed());
    println!(
        "{}",
        format!("session '{session_id}' · mode {mode} · /help for commands, \"exit\" to quit").dimmed()
    );
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_home() {
        let result = expand_tilde("~/foo/bar");
        assert!(result.ends_with("foo/bar"));
        assert!(!result.starts_with("~"));
    }

    #[test]
    fn test_expand_tilde_no_tilde() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn test_runtime_needs_api_key_for_remote_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.agent.workspace = dir.path().display().to_string();
        config.memory.sessions_dir = Some(dir.path().join("sessions").display().to_string());
        let err = Runtime::build(&config, "s", None, None).err().unwrap();
        assert!(err.to_string().contains("No API key configured"));
    }

    #[test]
    fn test_runtime_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.agent.workspace = dir.path().display().to_string();
        config.memory.sessions_dir = Some(dir.path().join("sessions").display().to_string());
        config.provider.api_base = "http://localhost:11434/v1".into();

        let rt = Runtime::build(&config, "s", Some(Mode::Docs), Some("local".into())).unwrap();
        assert_eq!(rt.session.mode(), Mode::Docs);
        assert_eq!(rt.session.locked_model(), Some("local"));
        assert_eq!(rt.agent.tools().len(), 7);
        assert!(rt.memory.system().contains("Kestrel"));
    }
}
