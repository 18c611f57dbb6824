//! Config loader: reads `~/.kestrel/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.kestrel/config.json`
//! 3. Environment variables `KESTREL_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;
use crate::mode::Mode;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from `path` (or the default path) + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    apply_env_overrides(load_config_from_path(&config_path))
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Supported overrides:
/// - `KESTREL_AGENT__MODEL` → `agent.model`
/// - `KESTREL_AGENT__MODE` → `agent.mode`
/// - `KESTREL_AGENT__MAX_ITERATIONS` → `agent.max_iterations`
/// - `KESTREL_AGENT__TOKEN_BUDGET` → `agent.token_budget`
/// - `KESTREL_AGENT__TIMEOUT_SECS` → `agent.timeout_secs`
/// - `KESTREL_AGENT__WORKSPACE` → `agent.workspace`
/// - `KESTREL_PROVIDER__API_KEY` → `provider.api_key`
/// - `KESTREL_PROVIDER__API_BASE` → `provider.api_base`
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(val) = std::env::var("KESTREL_AGENT__MODEL") {
        config.agent.model = if val.is_empty() { None } else { Some(val) };
    }
    if let Ok(val) = std::env::var("KESTREL_AGENT__MODE") {
        match val.parse::<Mode>() {
            Ok(mode) => config.agent.mode = mode,
            Err(e) => warn!("Ignoring KESTREL_AGENT__MODE: {}", e),
        }
    }
    if let Ok(val) = std::env::var("KESTREL_AGENT__MAX_ITERATIONS") {
        if let Ok(n) = val.parse::<usize>() {
            config.agent.max_iterations = n;
        }
    }
    if let Ok(val) = std::env::var("KESTREL_AGENT__TOKEN_BUDGET") {
        if let Ok(n) = val.parse::<usize>() {
            config.agent.token_budget = n;
        }
    }
    if let Ok(val) = std::env::var("KESTREL_AGENT__TIMEOUT_SECS") {
        if let Ok(n) = val.parse::<u64>() {
            config.agent.timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("KESTREL_AGENT__WORKSPACE") {
        config.agent.workspace = val;
    }

    if let Ok(val) = std::env::var("KESTREL_PROVIDER__API_KEY") {
        config.provider.api_key = val;
    }
    if let Ok(val) = std::env::var("KESTREL_PROVIDER__API_BASE") {
        config.provider.api_base = val;
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
