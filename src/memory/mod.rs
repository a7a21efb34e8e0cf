//! Memory service client — semantic retrieval and write-back over the
//! OpenMemory-style collections API.
//!
//! The service owns all durable state; this module only constructs and
//! transmits entries. Wire types are private — callers see [`MemoryMatch`]
//! and [`Interaction`] only.
//!
//! The retrieval cap and similarity floor are enforced client-side on top of
//! whatever the server returns, so a misbehaving server cannot leak
//! low-similarity or surplus matches into a prompt.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::MemoryConfig;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Transport-level failure — endpoint unreachable, connection refused.
    #[error("memory service unavailable: {0}")]
    Unavailable(String),
    /// The service answered, but not with what we expected.
    #[error("memory protocol error: {0}")]
    Protocol(String),
}

// ── Public types ──────────────────────────────────────────────────────────────

/// One completed turn, as written back to the memory service.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata tags stored alongside the entry.
    pub tags: HashMap<String, String>,
}

impl Interaction {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
            tags: HashMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Storage rendering of the exchange.
    pub fn render(&self) -> String {
        format!("User: {}\n\nAssistant: {}", self.query, self.response)
    }
}

/// A retrieval hit, highest similarity first in any returned sequence.
#[derive(Debug, Clone)]
pub struct MemoryMatch {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// HTTP client for the memory service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    client: Client,
    base_url: String,
    collection: String,
    top_k: usize,
    similarity_threshold: f32,
    similarity_metric: String,
}

impl MemoryClient {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url(),
            collection: config.collection.clone(),
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            similarity_metric: config.similarity_metric.clone(),
        }
    }

    /// Create the configured collection if it does not exist yet.
    ///
    /// Called once at startup. Callers treat failure as soft — the service
    /// may come up later, and every turn degrades gracefully without memory.
    pub async fn ensure_collection(&self) -> Result<(), MemoryError> {
        let url = format!("{}/collections", self.base_url);
        let listed: Vec<CollectionInfo> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(status_error)?
            .json()
            .await
            .map_err(|e| MemoryError::Protocol(format!("collection list parse: {e}")))?;

        if listed.iter().any(|c| c.name == self.collection) {
            info!(collection = %self.collection, "using existing memory collection");
            return Ok(());
        }

        info!(collection = %self.collection, "creating memory collection");
        self.client
            .post(&url)
            .json(&CreateCollectionRequest {
                name: self.collection.clone(),
                metadata: HashMap::from([(
                    "description".to_string(),
                    "memosearch conversation history".to_string(),
                )]),
            })
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(status_error)?;
        Ok(())
    }

    /// Query for entries semantically similar to `query`.
    ///
    /// Returns at most `top_k` matches, every one scoring at least the
    /// configured similarity threshold, ordered highest first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<MemoryMatch>, MemoryError> {
        let url = format!("{}/collections/{}/search", self.base_url, self.collection);
        let results: Vec<RawMatch> = self
            .client
            .post(&url)
            .json(&SearchRequest {
                query: query.to_string(),
                limit: self.top_k,
                min_score: self.similarity_threshold,
                metric: self.similarity_metric.clone(),
            })
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(status_error)?
            .json()
            .await
            .map_err(|e| MemoryError::Protocol(format!("search response parse: {e}")))?;

        let mut matches: Vec<MemoryMatch> = results
            .into_iter()
            .filter(|r| r.score >= self.similarity_threshold)
            .map(|r| MemoryMatch {
                id: r.id,
                text: r.text,
                score: r.score,
                metadata: r.metadata,
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(self.top_k);

        debug!(
            query = %truncate_for_log(query),
            count = matches.len(),
            "retrieved memory matches"
        );
        Ok(matches)
    }

    /// Store a completed interaction, tagged as conversation history.
    pub async fn store(&self, interaction: &Interaction) -> Result<String, MemoryError> {
        let mut metadata = interaction.tags.clone();
        metadata.insert("query".to_string(), interaction.query.clone());
        self.store_text(
            &interaction.render(),
            metadata,
            "conversation",
            interaction.timestamp,
        )
        .await
    }

    /// Store arbitrary text with standard metadata injected.
    ///
    /// Every entry gets an ISO-8601 `timestamp` and a `source_type` tag on
    /// top of the caller's metadata. Returns the new entry's id. No
    /// deduplication happens anywhere on this path — identical content
    /// stored twice produces two entries.
    pub async fn store_text(
        &self,
        text: &str,
        mut metadata: HashMap<String, String>,
        source_type: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<String, MemoryError> {
        metadata.insert("timestamp".to_string(), timestamp.to_rfc3339());
        metadata.insert("source_type".to_string(), source_type.to_string());

        let url = format!("{}/collections/{}/memories", self.base_url, self.collection);
        let created: CreatedMemory = self
            .client
            .post(&url)
            .json(&AddMemoryRequest { text: text.to_string(), metadata })
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(status_error)?
            .json()
            .await
            .map_err(|e| MemoryError::Protocol(format!("store response parse: {e}")))?;

        debug!(id = %created.id, %source_type, "stored memory entry");
        Ok(created.id)
    }
}

fn transport_error(e: reqwest::Error) -> MemoryError {
    error!(error = %e, "memory request failed (transport)");
    MemoryError::Unavailable(e.to_string())
}

fn status_error(e: reqwest::Error) -> MemoryError {
    error!(error = %e, "memory request returned HTTP error");
    MemoryError::Protocol(e.to_string())
}

fn truncate_for_log(s: &str) -> String {
    s.chars().take(50).collect()
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    name: String,
}

#[derive(Debug, Serialize)]
struct AddMemoryRequest {
    text: String,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest {
    name: String,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    query: String,
    limit: usize,
    min_score: f32,
    metric: String,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    id: String,
    text: String,
    score: f32,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CreatedMemory {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MemoryClient {
        let mut cfg = Config::test_default().memory;
        let addr = server.address();
        cfg.host = addr.ip().to_string();
        cfg.port = addr.port();
        cfg.top_k = 2;
        cfg.similarity_threshold = 0.7;
        MemoryClient::new(&cfg)
    }

    #[tokio::test]
    async fn retrieve_passes_config_and_orders_matches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/test/search"))
            .and(body_partial_json(json!({
                "limit": 2,
                "min_score": 0.7,
                "metric": "cosine"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "b", "text": "second", "score": 0.75 },
                { "id": "a", "text": "first", "score": 0.9, "metadata": { "source_type": "conversation" } }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let matches = client_for(&server).retrieve("deadline?").await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "a");
        assert_eq!(matches[1].id, "b");
        assert_eq!(matches[0].metadata.get("source_type").unwrap(), "conversation");
    }

    #[tokio::test]
    async fn retrieve_enforces_cap_and_floor_against_misbehaving_server() {
        let server = MockServer::start().await;
        // Server ignores limit/min_score: four results, one below threshold.
        Mock::given(method("POST"))
            .and(path("/collections/test/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "a", "text": "a", "score": 0.95 },
                { "id": "low", "text": "low", "score": 0.2 },
                { "id": "b", "text": "b", "score": 0.85 },
                { "id": "c", "text": "c", "score": 0.8 }
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let matches = client.retrieve("q").await.unwrap();
        assert_eq!(matches.len(), 2, "top_k cap must hold");
        assert!(matches.iter().all(|m| m.score >= 0.7), "threshold floor must hold");
    }

    #[tokio::test]
    async fn retrieve_unreachable_is_unavailable() {
        let mut cfg = Config::test_default().memory;
        cfg.port = 1;
        let err = MemoryClient::new(&cfg).retrieve("q").await.unwrap_err();
        assert!(matches!(err, MemoryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn store_injects_standard_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/test/memories"))
            .and(body_partial_json(json!({
                "metadata": { "source_type": "conversation", "query": "when?" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let interaction = Interaction::new("when?", "March 5.").tag("channel", "console");
        let id = client_for(&server).store(&interaction).await.unwrap();
        assert_eq!(id, "m-1");
    }

    #[tokio::test]
    async fn identical_stores_create_distinct_entries() {
        let server = MockServer::start().await;
        // No client-side dedup: the same content sent twice reaches the
        // service twice.
        Mock::given(method("POST"))
            .and(path("/collections/test/memories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m" })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let interaction = Interaction::new("q", "r");
        client.store(&interaction).await.unwrap();
        client.store(&interaction).await.unwrap();
    }

    #[tokio::test]
    async fn ensure_collection_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "name": "other" }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections"))
            .and(body_partial_json(json!({ "name": "test" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn ensure_collection_skips_create_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "name": "test" }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        client_for(&server).ensure_collection().await.unwrap();
    }

    #[test]
    fn interaction_render_format() {
        let i = Interaction::new("what deadline?", "March 5");
        assert_eq!(i.render(), "User: what deadline?\n\nAssistant: March 5");
    }
}
