//! LLM provider trait: the seam between the agent loop and any backend.
//!
//! `HttpProvider` in `http_provider.rs` covers OpenAI-compatible streaming
//! APIs; tests substitute scripted implementations.

use async_trait::async_trait;
use kestrel_core::types::{LlmResponse, Message, ToolDefinition};

use crate::error::ProviderError;
use crate::stream::DeltaCallback;

/// Per-call generation settings.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a chat completion and resolve it into a single response.
    ///
    /// # Arguments
    /// * `messages`: Outbound conversation, system turn first.
    /// * `tools`   : Tool definitions the model may call.
    /// * `model`   : Model identifier.
    /// * `config`  : Temperature, max_tokens.
    /// * `on_delta`: Optional observer for each text delta.
    ///
    /// # Errors
    /// Transport failures, timeouts and non-success statuses are returned as
    /// [`ProviderError`]. Malformed stream fragments are not errors.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        on_delta: Option<&DeltaCallback<'_>>,
    ) -> Result<LlmResponse, ProviderError>;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
