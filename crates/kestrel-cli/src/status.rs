//! `kestrel status`: show configuration and provider status.

use anyhow::Result;
use colored::Colorize;

use kestrel_agent::IntentRouter;
use kestrel_core::config::{get_config_path, load_config};
use kestrel_core::Mode;

fn check(exists: bool) -> String {
    if exists {
        "✓".green().to_string()
    } else {
        "(not found)".red().to_string()
    }
}

/// Run the status command.
pub fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "Kestrel Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        check(config_path.exists())
    );

    let workspace = crate::helpers::expand_tilde(&config.agent.workspace);
    println!(
        "  {:<18} {} {}",
        "Workspace:".bold(),
        workspace.display(),
        check(workspace.is_dir())
    );

    let key = if config.provider.is_configured() {
        format!("{} (key set)", "✓".green())
    } else {
        format!("{}", "· no API key".dimmed())
    };
    println!("  {:<18} {} {}", "Provider:".bold(), config.provider.api_base, key);

    println!("  {:<18} {}", "Mode:".bold(), config.agent.mode);
    println!(
        "  {:<18} {}",
        "Model:".bold(),
        config.agent.model.as_deref().unwrap_or("routed by mode")
    );
    println!(
        "  {:<18} {}",
        "Limits:".bold(),
        format!(
            "{} iterations · {} token budget · {}s timeout",
            config.agent.max_iterations, config.agent.token_budget, config.agent.timeout_secs
        )
        .dimmed()
    );
    if let Some(cmd) = &config.agent.test_command {
        println!("  {:<18} {}", "Test command:".bold(), cmd);
    }

    println!();
    println!("  {}", "Models (default / fallback):".bold());
    let router = IntentRouter::from_config(&config.models);
    for mode in Mode::ALL.into_iter().filter(|m| !m.is_auto()) {
        println!(
            "    {:<10} {} {}",
            mode.as_str(),
            router.default_model(mode),
            format!("/ {}", router.fallback_model(mode)).dimmed()
        );
    }

    match crate::helpers::history_store(&config) {
        Ok(store) => {
            println!();
            println!("  {:<18} {}", "Sessions:".bold(), store.list().len());
        }
        Err(e) => println!("  {:<18} {}", "Sessions:".bold(), e.to_string().red()),
    }
    println!();

    Ok(())
}
