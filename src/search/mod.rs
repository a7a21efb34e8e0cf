//! Web search client — bounded queries against the Perplexica-style
//! `/search` endpoint.
//!
//! Search is a best-effort context source: a timeout or an unreachable
//! backend is reported as a typed error and the caller proceeds without
//! search context. Wire types are private; callers see [`SearchResult`].

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::SearchConfig;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SearchError {
    /// The request ran past the configured deadline.
    #[error("search timed out after {0}s")]
    Timeout(u64),
    /// Transport-level failure — endpoint unreachable, connection refused.
    #[error("search service unavailable: {0}")]
    Unavailable(String),
    /// The service answered, but not with what we expected.
    #[error("search protocol error: {0}")]
    Protocol(String),
}

// ── Public types ──────────────────────────────────────────────────────────────

/// One ranked, summarized result from the search backend.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub score: f32,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// HTTP client for the search service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    base_url: String,
    max_results: usize,
    threshold: f32,
    timeout_seconds: u64,
}

impl SearchClient {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SearchError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            max_results: config.max_results,
            threshold: config.threshold,
            timeout_seconds: config.timeout_seconds,
        })
    }

    /// Run a web search for `query`.
    ///
    /// Returns at most `max_results` results, each with relevance at least
    /// the configured threshold. Backends that report no per-result score
    /// are taken at face value (score defaults to 1.0).
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SearchRequest {
                query: query.to_string(),
                max_results: self.max_results,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    debug!(timeout_seconds = self.timeout_seconds, "search timed out");
                    SearchError::Timeout(self.timeout_seconds)
                } else {
                    error!(error = %e, "search request failed (transport)");
                    SearchError::Unavailable(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| SearchError::Protocol(e.to_string()))?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Protocol(format!("response parse: {e}")))?;

        let mut results: Vec<SearchResult> = parsed
            .results
            .into_iter()
            .filter(|r| r.score >= self.threshold)
            .map(|r| SearchResult {
                title: r.title,
                snippet: r.snippet,
                url: r.url,
                score: r.score,
            })
            .collect();
        results.truncate(self.max_results);

        debug!(count = results.len(), "search returned results");
        Ok(results)
    }
}

/// Render results as a numbered text block for prompt injection and memory
/// write-back.
pub fn format_results(results: &[SearchResult], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for: {query}");
    }

    let mut formatted = format!("Search results for: {query}\n\n");
    for (i, result) in results.iter().enumerate() {
        formatted.push_str(&format!(
            "{}. {}\n{}\nSource: {}\n\n",
            i + 1,
            result.title,
            result.snippet,
            result.url
        ));
    }
    formatted
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SearchRequest {
    query: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    url: String,
    #[serde(default = "default_score")]
    score: f32,
}

// Scoreless backends pass the relevance filter unconditionally.
fn default_score() -> f32 {
    1.0
}
