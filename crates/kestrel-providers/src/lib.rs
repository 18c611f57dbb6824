//! LLM provider layer for Kestrel.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`]: trait that all providers implement
//! - [`stream::StreamDecoder`]: incremental `text/event-stream` decoder
//! - [`error::ProviderError`]: typed call failures, including capacity detection
//! - [`http_provider::HttpProvider`]: streaming OpenAI-compatible HTTP client
//! - [`http_provider::create_provider`]: convenience builder from config

pub mod error;
pub mod http_provider;
pub mod stream;
pub mod traits;

// Re-export main types for convenience
pub use error::ProviderError;
pub use http_provider::{create_provider, HttpProvider};
pub use stream::{DeltaCallback, StreamDecoder, ToolCallSlot};
pub use traits::{LlmProvider, LlmRequestConfig};
