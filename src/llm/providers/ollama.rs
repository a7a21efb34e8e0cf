//! Ollama generation provider (`/api/generate`).
//!
//! Exposes the single `complete(&str) -> String` interface matching the rest
//! of the `LlmProvider` abstraction. All Ollama wire types are private to
//! this module — callers never see them. Prompt assembly belongs at the
//! chain layer; this provider is stateless, one round-trip per call.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::ProviderError;

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for an Ollama server's non-streaming generate endpoint.
///
/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

impl OllamaProvider {
    /// Build a provider from config values.
    pub fn new(
        base_url: String,
        model: String,
        temperature: f32,
        top_p: f32,
        max_tokens: u32,
        timeout_seconds: u64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url, model, temperature, top_p, max_tokens })
    }

    /// Lightweight reachability probe.
    ///
    /// Hits the server root (Ollama answers any liveness GET). Any HTTP
    /// response, including 4xx, means the server is reachable; only a
    /// transport-level failure (connection refused, timeout) is treated as
    /// unreachable. Uses a hard 5-second timeout regardless of the
    /// generation timeout config.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build ping client: {e}")))?;
        client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Request(format!("unreachable: {e}")))
    }

    /// Send `prompt` and return the generated text.
    pub async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let payload = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                top_p: self.top_p,
                num_predict: self.max_tokens,
            },
        };

        debug!(
            model = %payload.model,
            temperature = payload.options.temperature,
            prompt_len = prompt.len(),
            "sending generate request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full generate request payload");
        }

        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(&url).json(&payload).send().await.map_err(|e| {
            error!(url = %url, error = %e, "generate request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;

        let parsed = response.json::<GenerateResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize generate response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(done = parsed.done, "received generate response");

        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::Request("empty response from model".into()));
        }
        Ok(text)
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

// Error envelope used by Ollama: `{"error": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        format!("HTTP {status}: {}", env.error)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "generate request returned HTTP error");
    Err(ProviderError::Request(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> OllamaProvider {
        OllamaProvider::new(base_url, "gemma:3b".into(), 0.7, 0.9, 128, 2).unwrap()
    }

    #[tokio::test]
    async fn complete_returns_generated_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "gemma:3b",
                "stream": false,
                "options": { "num_predict": 128 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "  The deadline is March 5.  ",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = provider(server.uri()).complete("When is it due?").await.unwrap();
        assert_eq!(text, "The deadline is March 5.");
    }

    #[tokio::test]
    async fn model_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({ "error": "model 'gemma:3b' not found" })),
            )
            .mount(&server)
            .await;

        let err = provider(server.uri()).complete("hi").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("404"), "got: {msg}");
        assert!(msg.contains("not found"), "got: {msg}");
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": "   ", "done": true })),
            )
            .mount(&server)
            .await;

        assert!(provider(server.uri()).complete("hi").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        // Port 1 is never listening.
        let err = provider("http://127.0.0.1:1".into()).complete("hi").await.unwrap_err();
        assert!(matches!(err, ProviderError::Request(_)));
    }

    #[tokio::test]
    async fn ping_accepts_any_http_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ollama is running"))
            .mount(&server)
            .await;

        assert!(provider(server.uri()).ping().await.is_ok());
    }

    #[tokio::test]
    async fn ping_fails_on_refused_connection() {
        assert!(provider("http://127.0.0.1:1".into()).ping().await.is_err());
    }
}
