//! Streaming HTTP provider for OpenAI-compatible APIs.
//!
//! Posts to `{api_base}/chat/completions` with `stream: true` and feeds the
//! `text/event-stream` body through a [`StreamDecoder`]. The whole call,
//! including the stream, is bounded by a single timeout.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, warn};

use kestrel_core::config::{Config, ProviderConfig};
use kestrel_core::types::{
    ChatCompletionRequest, LlmResponse, Message, StreamOptions, ToolDefinition,
};

use crate::error::ProviderError;
use crate::stream::{DeltaCallback, StreamDecoder};
use crate::traits::{LlmProvider, LlmRequestConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A provider that talks to any OpenAI-compatible streaming HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// API key for Bearer authentication. Empty for keyless local servers.
    api_key: String,
    /// Default model for this provider instance.
    default_model: String,
    /// Extra headers sent with each request.
    extra_headers: HeaderMap,
    /// Deadline for one whole call.
    timeout: Duration,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpProvider {
    /// Create a provider from the `provider` config section.
    pub fn new(
        config: &ProviderConfig,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!("Invalid header: {}={}", key, value);
                }
            }
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(HttpProvider {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            default_model: model.to_string(),
            extra_headers,
            timeout,
        })
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    async fn stream_completion(
        &self,
        body: &ChatCompletionRequest<'_>,
        on_delta: Option<&DeltaCallback<'_>>,
    ) -> Result<LlmResponse, ProviderError> {
        let mut request = self
            .client
            .post(self.completions_url())
            .headers(self.extra_headers.clone())
            .json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(api_base = %self.api_base, error = %e, "HTTP request failed");
            ProviderError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            let err = ProviderError::from_status(status.as_u16(), &body);
            error!(status = %status, capacity = err.is_capacity(), error = %err, "API error");
            return Err(err);
        }

        let mut decoder = StreamDecoder::new();
        if let Some(cb) = on_delta {
            decoder = decoder.with_callback(cb);
        }
        drain_body(response.bytes_stream(), decoder).await
    }
}

/// Feed a response body into `decoder` until `[DONE]` or a clean close.
///
/// A transport error mid-body fails the call; partial tool-call arguments
/// are never handed back as a response.
async fn drain_body<S, B, E>(
    mut body: S,
    mut decoder: StreamDecoder<'_>,
) -> Result<LlmResponse, ProviderError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                decoder.feed(bytes.as_ref());
                if decoder.is_done() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "stream interrupted");
                return Err(ProviderError::Transport(e.to_string()));
            }
        }
    }

    if !decoder.is_done() {
        debug!("stream closed without completion sentinel");
    }
    let anomalies = decoder.anomalies();
    let resp = decoder.finish();
    debug!(
        content_len = resp.content.len(),
        tool_calls = resp.tool_calls.len(),
        anomalies,
        finish_reason = resp.finish_reason.as_deref().unwrap_or("?"),
        "LLM response received"
    );
    Ok(resp)
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        on_delta: Option<&DeltaCallback<'_>>,
    ) -> Result<LlmResponse, ProviderError> {
        let tools = tools.filter(|t| !t.is_empty());

        debug!(
            model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "Calling LLM"
        );

        let body = ChatCompletionRequest {
            model,
            messages,
            tools,
            tool_choice: tools.map(|_| "auto"),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        match tokio::time::timeout(self.timeout, self.stream_completion(&body, on_delta)).await {
            Ok(result) => result,
            Err(_) => {
                error!(model, timeout = ?self.timeout, "LLM call timed out");
                Err(ProviderError::Timeout(self.timeout))
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        &self.api_base
    }
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build an [`HttpProvider`] from the loaded configuration.
///
/// `model` is the provider's default model, normally the resolved default
/// for the configured mode.
pub fn create_provider(config: &Config, model: &str) -> anyhow::Result<HttpProvider> {
    let is_local = config.provider.api_base.contains("localhost")
        || config.provider.api_base.contains("127.0.0.1");
    if !config.provider.is_configured() && !is_local {
        anyhow::bail!(
            "No API key configured for {}. Set provider.apiKey in {} or KESTREL_PROVIDER__API_KEY.",
            config.provider.api_base,
            kestrel_core::config::get_config_path().display()
        );
    }

    debug!(api_base = %config.provider.api_base, model, "Creating LLM provider");
    let timeout = Duration::from_secs(config.agent.timeout_secs);
    Ok(HttpProvider::new(&config.provider, model, timeout)?)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: &str) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.to_string(),
            extra_headers: None,
        }
    }

    fn make_provider(api_base: &str) -> HttpProvider {
        HttpProvider::new(
            &make_config("test-key-123", api_base),
            "gpt-4o",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn sse(events: &[serde_json::Value], done: bool) -> String {
        let mut body: String = events
            .iter()
            .map(|e| format!("data: {}\n\n", e))
            .collect();
        if done {
            body.push_str("data: [DONE]\n\n");
        }
        body
    }

    fn text_event(text: &str) -> serde_json::Value {
        serde_json::json!({"choices":[{"delta":{"content":text}}]})
    }

    fn sse_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    // ── Unit tests ──

    #[test]
    fn test_completions_url_trailing_slash() {
        let provider = make_provider("https://api.openai.com/v1/");
        assert_eq!(
            provider.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_extra_headers() {
        let mut headers = HashMap::new();
        headers.insert("X-App-Code".to_string(), "my-app-code".to_string());
        let config = ProviderConfig {
            api_key: "key".to_string(),
            api_base: "http://localhost".to_string(),
            extra_headers: Some(headers),
        };
        let provider = HttpProvider::new(&config, "gpt-4o", Duration::from_secs(1)).unwrap();
        assert!(provider.extra_headers.contains_key("x-app-code"));
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = Config::default();
        let err = create_provider(&config, "gpt-4o").unwrap_err();
        assert!(err.to_string().contains("No API key"));
    }

    #[test]
    fn test_create_provider_allows_local_without_key() {
        let mut config = Config::default();
        config.provider.api_base = "http://localhost:11434/v1".to_string();
        let provider = create_provider(&config, "llama3").unwrap();
        assert_eq!(provider.default_model(), "llama3");
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_streamed_text() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "stream": true,
                "stream_options": {"include_usage": true}
            })))
            .respond_with(sse_response(sse(
                &[
                    text_event("Hello! "),
                    text_event("I'm Kestrel."),
                    serde_json::json!({"choices":[{"delta":{},"finish_reason":"stop"}]}),
                    serde_json::json!({"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}),
                ],
                true,
            )))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri());
        let seen = Mutex::new(String::new());
        let cb: &DeltaCallback<'_> = &|d: &str| seen.lock().unwrap().push_str(d);

        let resp = provider
            .chat(
                &[Message::system("You are Kestrel."), Message::user("Hello")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
                Some(cb),
            )
            .await
            .unwrap();

        assert_eq!(resp.content, "Hello! I'm Kestrel.");
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
        assert_eq!(*seen.lock().unwrap(), "Hello! I'm Kestrel.");
    }

    #[tokio::test]
    async fn test_streamed_tool_calls() {
        let mock_server = MockServer::start().await;
        let events = [
            serde_json::json!({"choices":[{"delta":{"tool_calls":[
                {"index":0,"id":"call_abc","type":"function","function":{"name":"list_files","arguments":""}}
            ]}}]}),
            serde_json::json!({"choices":[{"delta":{"tool_calls":[
                {"index":0,"function":{"arguments":"{\"path\":"}}
            ]}}]}),
            serde_json::json!({"choices":[{"delta":{"tool_calls":[
                {"index":0,"function":{"arguments":"\".\"}"}}
            ]}}]}),
            serde_json::json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}),
        ];
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"tool_choice": "auto"})))
            .respond_with(sse_response(sse(&events, true)))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri());
        let tool_def = ToolDefinition::new(
            "list_files",
            "List files",
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        );

        let resp = provider
            .chat(
                &[Message::user("list files")],
                Some(&[tool_def]),
                "gpt-4o",
                &LlmRequestConfig::default(),
                None,
            )
            .await
            .unwrap();

        assert!(resp.content.is_empty());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_abc");
        let inv = resp.tool_calls[0].invocation().unwrap();
        assert_eq!(inv.name, "list_files");
        assert_eq!(inv.arguments["path"], ".");
    }

    #[tokio::test]
    async fn test_stream_without_sentinel_resolves() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse(&[text_event("partial")], false)))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri());
        let resp = provider
            .chat(&[Message::user("hi")], None, "gpt-4o", &LlmRequestConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(resp.content, "partial");
    }

    #[tokio::test]
    async fn test_rate_limit_is_capacity_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded", "type": "rate_limit_error" }
            })))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri());
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default(), None)
            .await
            .unwrap_err();

        assert!(err.is_capacity());
        assert_eq!(err.status(), Some(429));
        assert!(err.to_string().contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_api_error_carries_status_and_message() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Invalid API key" }
            })))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri());
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default(), None)
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_network_error_is_transport() {
        // Point to a port that's not listening
        let provider = make_provider("http://127.0.0.1:1");
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                sse_response(sse(&[text_event("late")], true)).set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let provider = HttpProvider::new(
            &make_config("k", &mock_server.uri()),
            "gpt-4o",
            Duration::from_millis(200),
        )
        .unwrap();
        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_body_error_mid_stream_is_transport() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"write_file","arguments":"{\"pa"}}]}}]}"#.to_vec()),
            Ok(b"\n\n".to_vec()),
            Err("connection reset by peer".into()),
        ];
        let err = drain_body(futures_util::stream::iter(chunks), StreamDecoder::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::Transport(msg) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_close_without_done_keeps_partial() {
        let chunks: Vec<Result<Vec<u8>, String>> =
            vec![Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n".to_vec())];
        let resp = drain_body(futures_util::stream::iter(chunks), StreamDecoder::new())
            .await
            .unwrap();
        assert_eq!(resp.content, "partial");
    }
}
