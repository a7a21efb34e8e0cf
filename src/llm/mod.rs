//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities — clone them freely.
//! Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency;
//! `complete` is an `async fn` on the enum so callers need no trait-object
//! machinery.

pub mod providers;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    Ollama(providers::ollama::OllamaProvider),
}

impl LlmProvider {
    /// Send `prompt` to the provider and return its generated text.
    pub async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(prompt).await,
            LlmProvider::Ollama(p) => p.complete(prompt).await,
        }
    }

    /// Lightweight reachability probe — used at startup for a log-only
    /// health report. The dummy provider is always reachable.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        match self {
            LlmProvider::Dummy(_) => Ok(()),
            LlmProvider::Ollama(p) => p.ping().await,
        }
    }
}
