//! Dummy LLM provider — echoes input back prefixed with `[echo]`.
//! Used for testing the full turn pipeline without a running model server.

use crate::llm::ProviderError;

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!("[echo] {prompt}"))
    }
}
