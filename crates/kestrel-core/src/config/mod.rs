//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use kestrel_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Max iterations: {}", cfg.agent.max_iterations);
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{AgentConfig, Config, MemoryConfig, ModelsConfig, ProviderConfig};
