//! LLM provider implementations.
//!
//! `build(config)` is the factory — called at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod ollama;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct a `LlmProvider` from config.
pub fn build(config: &LlmConfig) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "ollama" => {
            let p = ollama::OllamaProvider::new(
                config.base_url(),
                config.model.clone(),
                config.temperature,
                config.top_p,
                config.max_tokens,
                config.timeout_seconds,
            )?;
            Ok(LlmProvider::Ollama(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}
