//! Turn orchestration — the coordination contract of the whole system.
//!
//! One [`Chain::turn`] call runs the full pipeline: memory lookup → optional
//! web search → prompt assembly → model call → memory write-back. Memory and
//! search failures degrade the turn (reduced context, warning logged); an LLM
//! failure is terminal and surfaces to the caller, with no write-back.
//!
//! The chain keeps a bounded in-process conversation window for multi-turn
//! context. It is the only cross-request mutable state; everything durable
//! lives in the memory service.

pub mod prompt;

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::{LlmProvider, ProviderError};
use crate::memory::{Interaction, MemoryClient, MemoryMatch};
use crate::search::{self, SearchClient, SearchResult};
use prompt::PromptBuilder;

/// How many recent history entries to inject as conversation context.
const CONTEXT_WINDOW: usize = 20;

const DEFAULT_PROMPTS_DIR: &str = "config/prompts";

// Inline fallback when `config/prompts/chat_context.txt` is absent.
const FALLBACK_CONTEXT_BODY: &str = "Conversation history:\n{{history}}\n\nMemory:\n{{memory}}\n\nSearch results:\n{{search}}\n\nUser: {{user_input}}\nAssistant:";

// ── Error ─────────────────────────────────────────────────────────────────────

/// Errors that abort a turn. Degradable failures (memory, search) never
/// reach this type.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("llm error: {0}")]
    Llm(#[from] ProviderError),
}

// ── History ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct HistoryEntry {
    role: &'static str,
    content: String,
}

// ── Chain ─────────────────────────────────────────────────────────────────────

pub struct Chain {
    llm: LlmProvider,
    memory: MemoryClient,
    search: Option<SearchClient>,
    /// A turn searches the web when its best memory similarity is below this.
    search_trigger: f32,
    prompts_dir: PathBuf,
    history: Mutex<Vec<HistoryEntry>>,
}

impl Chain {
    pub fn new(
        llm: LlmProvider,
        memory: MemoryClient,
        search: Option<SearchClient>,
        search_trigger: f32,
    ) -> Self {
        Self {
            llm,
            memory,
            search,
            search_trigger,
            prompts_dir: PathBuf::from(DEFAULT_PROMPTS_DIR),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Override the prompt template directory (tests, packaging).
    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = dir.into();
        self
    }

    /// Direct access for the HTTP memory endpoint.
    pub fn memory(&self) -> &MemoryClient {
        &self.memory
    }

    /// Direct access for the HTTP search endpoint — `None` when disabled.
    pub fn search_client(&self) -> Option<&SearchClient> {
        self.search.as_ref()
    }

    /// Run one full turn for `input` and return the assistant's response.
    pub async fn turn(&self, input: &str) -> Result<String, ChainError> {
        let turn_id = Uuid::new_v4();
        debug!(%turn_id, input_len = input.len(), "turn started");

        // 1. Memory lookup — unavailability degrades to no context.
        let matches = match self.memory.retrieve(input).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(%turn_id, "memory retrieval failed, continuing without: {e}");
                Vec::new()
            }
        };

        // 2. Optional web search — timeout or failure degrades to no context.
        let search_content = self.maybe_search(&turn_id, input, &matches).await;

        // 3. Prompt assembly.
        let memory_content = if matches.is_empty() {
            "No relevant memory found.".to_string()
        } else {
            matches
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        let history_content = self.render_history().await;

        let body = std::fs::read_to_string(self.prompts_dir.join("chat_context.txt"))
            .unwrap_or_else(|_| FALLBACK_CONTEXT_BODY.to_string());
        let prompt = PromptBuilder::new(&self.prompts_dir)
            .layer("system.md")
            .append(body)
            .var("memory", &memory_content)
            .var(
                "search",
                search_content.as_deref().unwrap_or("No web search performed."),
            )
            .var("history", &history_content)
            .var("user_input", input)
            .build();

        // 4. Model call — terminal on failure, nothing is written back.
        let reply = self.llm.complete(&prompt).await?;

        // 5. Record the exchange: bounded history, then memory write-back.
        self.push_history(input, &reply).await;

        let interaction = Interaction::new(input, &reply).tag("turn_id", turn_id.to_string());
        if let Err(e) = self.memory.store(&interaction).await {
            warn!(%turn_id, "interaction write-back failed: {e}");
        }

        info!(%turn_id, reply_len = reply.len(), "turn completed");
        Ok(reply)
    }

    /// Forget the in-process conversation window.
    pub async fn reset(&self) {
        self.history.lock().await.clear();
        info!("chat history reset");
    }

    // Search when enabled and memory alone looks insufficient: no match at
    // all, or the best similarity below the trigger threshold.
    fn should_search(&self, matches: &[MemoryMatch]) -> bool {
        match matches.first() {
            None => true,
            Some(best) => best.score < self.search_trigger,
        }
    }

    async fn maybe_search(
        &self,
        turn_id: &Uuid,
        input: &str,
        matches: &[MemoryMatch],
    ) -> Option<String> {
        let client = self.search.as_ref()?;
        if !self.should_search(matches) {
            debug!(%turn_id, "memory context sufficient — skipping web search");
            return None;
        }

        let results = match client.search(input).await {
            Ok(results) if results.is_empty() => {
                debug!(%turn_id, "web search returned nothing");
                return None;
            }
            Ok(results) => results,
            Err(e) => {
                warn!(%turn_id, "web search failed, continuing without: {e}");
                return None;
            }
        };

        let formatted = search::format_results(&results, input);
        self.store_search_results(turn_id, input, &results, &formatted).await;
        Some(formatted)
    }

    // Search context is memory too: write it back tagged as such so later
    // turns can retrieve it without re-searching.
    async fn store_search_results(
        &self,
        turn_id: &Uuid,
        query: &str,
        results: &[SearchResult],
        formatted: &str,
    ) {
        let urls = results.iter().map(|r| r.url.as_str()).collect::<Vec<_>>().join(" ");
        let metadata = HashMap::from([
            ("query".to_string(), query.to_string()),
            ("urls".to_string(), urls),
            ("result_count".to_string(), results.len().to_string()),
        ]);
        if let Err(e) = self
            .memory
            .store_text(formatted, metadata, "search", chrono::Utc::now())
            .await
        {
            warn!(%turn_id, "search result write-back failed: {e}");
        }
    }

    async fn render_history(&self) -> String {
        let history = self.history.lock().await;
        history
            .iter()
            .map(|e| format!("{}: {}", e.role, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn push_history(&self, query: &str, reply: &str) {
        let mut history = self.history.lock().await;
        history.push(HistoryEntry { role: "user", content: query.to_string() });
        history.push(HistoryEntry { role: "assistant", content: reply.to_string() });
        let len = history.len();
        if len > CONTEXT_WINDOW {
            history.drain(..len - CONTEXT_WINDOW);
        }
    }
}
