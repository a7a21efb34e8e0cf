//! End-to-end turn pipeline tests against mocked external services.
//!
//! All three collaborators (memory, search, LLM) are wiremock servers here,
//! so these tests exercise the real HTTP clients and the real orchestration
//! order: retrieve → maybe search → generate → write back.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use memosearch::chain::Chain;
use memosearch::config::{LlmConfig, MemoryConfig, SearchConfig};
use memosearch::llm::providers;
use memosearch::memory::MemoryClient;
use memosearch::search::SearchClient;

fn memory_client(server: &MockServer) -> MemoryClient {
    let addr = server.address();
    MemoryClient::new(&MemoryConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        collection: "memosearch".into(),
        top_k: 5,
        similarity_threshold: 0.7,
        similarity_metric: "cosine".into(),
    })
}

fn search_client(server: &MockServer) -> SearchClient {
    let addr = server.address();
    SearchClient::new(&SearchConfig {
        enabled: true,
        host: addr.ip().to_string(),
        port: addr.port(),
        max_results: 5,
        threshold: 0.5,
        timeout_seconds: 2,
    })
    .unwrap()
}

fn ollama(server: &MockServer) -> memosearch::llm::LlmProvider {
    let addr = server.address();
    providers::build(&LlmConfig {
        provider: "ollama".into(),
        model: "gemma:3b".into(),
        host: addr.ip().to_string(),
        port: addr.port(),
        temperature: 0.7,
        top_p: 0.9,
        max_tokens: 256,
        timeout_seconds: 2,
    })
    .unwrap()
}

#[tokio::test]
async fn remembered_deadline_reaches_the_model_prompt() {
    let memory = MockServer::start().await;
    let llm = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/memosearch/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "m-1",
            "text": "User: remind me of the deadline\n\nAssistant: Your deadline is March 5",
            "score": 0.88,
            "metadata": { "source_type": "conversation" }
        }])))
        .expect(1)
        .mount(&memory)
        .await;
    Mock::given(method("POST"))
        .and(path("/collections/memosearch/memories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m-2" })))
        .expect(1)
        .mount(&memory)
        .await;

    // The generate request must carry the retrieved memory in its prompt.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Your deadline is March 5"))
        .and(body_string_contains("What is my project deadline?"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Your project deadline is March 5.",
            "done": true
        })))
        .expect(1)
        .mount(&llm)
        .await;

    let chain = Chain::new(ollama(&llm), memory_client(&memory), None, 0.5);
    let reply = chain.turn("What is my project deadline?").await.unwrap();
    assert_eq!(reply, "Your project deadline is March 5.");
}

#[tokio::test]
async fn cold_memory_falls_back_to_search_and_writes_both_back() {
    let memory = MockServer::start().await;
    let search = MockServer::start().await;
    let llm = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/memosearch/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&memory)
        .await;
    // Two write-backs: the search context, then the interaction.
    Mock::given(method("POST"))
        .and(path("/collections/memosearch/memories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m" })))
        .expect(2)
        .mount(&memory)
        .await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "title": "Release calendar",
                "snippet": "The launch happens next Tuesday.",
                "url": "https://example.org/calendar",
                "score": 0.9
            }]
        })))
        .expect(1)
        .mount(&search)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Release calendar"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "The launch is next Tuesday (example.org).",
            "done": true
        })))
        .mount(&llm)
        .await;

    let chain = Chain::new(
        ollama(&llm),
        memory_client(&memory),
        Some(search_client(&search)),
        0.5,
    );
    let reply = chain.turn("when is the launch?").await.unwrap();
    assert!(reply.contains("next Tuesday"));
}

#[tokio::test]
async fn dead_model_server_fails_the_turn_and_skips_writeback() {
    let memory = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/memosearch/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&memory)
        .await;
    Mock::given(method("POST"))
        .and(path("/collections/memosearch/memories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m" })))
        .expect(0)
        .mount(&memory)
        .await;

    // LLM points at a port nothing listens on.
    let dead = LlmConfig {
        provider: "ollama".into(),
        model: "gemma:3b".into(),
        host: "127.0.0.1".into(),
        port: 1,
        temperature: 0.7,
        top_p: 0.9,
        max_tokens: 256,
        timeout_seconds: 1,
    };
    let chain = Chain::new(
        providers::build(&dead).unwrap(),
        memory_client(&memory),
        None,
        0.5,
    );

    assert!(chain.turn("hello?").await.is_err());
}

#[tokio::test]
async fn every_service_down_still_fails_only_on_the_model() {
    // Memory and search both unreachable: the turn must still reach the LLM
    // and come back with an answer built from the bare prompt.
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "I don't have context for that, but hello!",
            "done": true
        })))
        .mount(&llm)
        .await;

    let dead_memory = MemoryClient::new(&MemoryConfig {
        host: "127.0.0.1".into(),
        port: 1,
        collection: "memosearch".into(),
        top_k: 5,
        similarity_threshold: 0.7,
        similarity_metric: "cosine".into(),
    });
    let dead_search = SearchClient::new(&SearchConfig {
        enabled: true,
        host: "127.0.0.1".into(),
        port: 1,
        max_results: 5,
        threshold: 0.5,
        timeout_seconds: 1,
    })
    .unwrap();

    let chain = Chain::new(ollama(&llm), dead_memory, Some(dead_search), 0.5);
    let reply = chain.turn("hello").await.unwrap();
    assert!(reply.contains("hello"));
}
