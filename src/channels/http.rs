//! Axum-based HTTP channel — the optional API surface over the chain.
//!
//! Implements [`Component`] so it slots into the channel-set lifecycle:
//! `run()` drives the axum event loop; the shared [`CancellationToken`] is
//! wired to axum's graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET  /api/health   — liveness, never authenticated
//! POST /api/chat     — run a turn       {"query": "..."}
//! POST /api/search   — direct web search
//! GET  /api/memory   — memory lookup    ?query=...&limit=N
//! POST /api/reset    — clear the conversation window
//! ```
//!
//! When an `API_TOKEN` is configured, every route except health requires
//! `Authorization: Bearer <token>`; mismatch or absence is a 401.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone — all fields are reference-counted or small.
#[derive(Clone)]
pub(crate) struct HttpState {
    /// Channel identifier used in log lines.
    pub channel_id: Arc<str>,
    pub chain: Arc<Chain>,
    /// Expected bearer token — `None` disables the auth check.
    pub token: Option<Arc<str>>,
    /// Log request payloads at debug level.
    pub debug: bool,
}

// ── HttpChannel ───────────────────────────────────────────────────────────────

pub struct HttpChannel {
    channel_id: String,
    bind_addr: String,
    chain: Arc<Chain>,
    token: Option<String>,
    debug: bool,
}

impl HttpChannel {
    pub fn new(
        channel_id: impl Into<String>,
        bind_addr: impl Into<String>,
        chain: Arc<Chain>,
        token: Option<String>,
        debug: bool,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            chain,
            token,
            debug,
        }
    }
}

impl Component for HttpChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_http(
            self.channel_id,
            self.bind_addr,
            self.chain,
            self.token,
            self.debug,
            shutdown,
        ))
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

async fn run_http(
    channel_id: String,
    bind_addr: String,
    chain: Arc<Chain>,
    token: Option<String>,
    debug: bool,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let state = HttpState {
        channel_id: Arc::from(channel_id.as_str()),
        chain,
        token: token.map(|t| Arc::from(t.as_str())),
        debug,
    };

    let router = build_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Channel(format!("http bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "http channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Channel(format!("http server error: {e}")))?;

    info!(%channel_id, "http channel shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub(crate) fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/search", post(search))
        .route("/api/memory", get(memory))
        .route("/api/reset", post(reset))
        .with_state(state)
}

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
}

#[derive(Deserialize)]
struct MemoryParams {
    query: Option<String>,
    limit: Option<usize>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

/// Check the bearer token when one is configured.
///
/// Health is the only route that skips this — everything else calls it
/// first and returns the ready-made 401 on failure.
fn authorize(state: &HttpState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.token else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected.as_ref() => Ok(()),
        Some(_) => {
            warn!(channel_id = %state.channel_id, "rejected request with wrong bearer token");
            Err((StatusCode::UNAUTHORIZED, json_error("unauthorized", "invalid token")).into_response())
        }
        None => {
            warn!(channel_id = %state.channel_id, "rejected request with no bearer token");
            Err((StatusCode::UNAUTHORIZED, json_error("unauthorized", "missing bearer token"))
                .into_response())
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/health — liveness only, no auth.
async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// POST /api/chat — run one full turn.
async fn chat(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    if state.debug {
        debug!(channel_id = %state.channel_id, query = %req.query, "chat request");
    }

    match tokio::time::timeout(Duration::from_secs(120), state.chain.turn(&req.query)).await {
        Ok(Ok(response)) => {
            (StatusCode::OK, Json(json!({ "response": response, "success": true }))).into_response()
        }
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "turn failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("llm_error", e)).into_response()
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            json_error("timeout", "turn timed out"),
        )
            .into_response(),
    }
}

/// POST /api/search — direct web search, bypassing the turn pipeline.
async fn search(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    let Some(client) = state.chain.search_client() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            json_error("search_disabled", "web search is disabled"),
        )
            .into_response();
    };

    match client.search(&req.query).await {
        Ok(results) => {
            let formatted = crate::search::format_results(&results, &req.query);
            (StatusCode::OK, Json(json!({ "results": formatted, "success": true }))).into_response()
        }
        Err(e) => {
            warn!(channel_id = %state.channel_id, "search failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("search_error", e)).into_response()
        }
    }
}

/// GET /api/memory?query=&limit= — memory lookup.
async fn memory(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(params): Query<MemoryParams>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    let query = params.query.unwrap_or_default();
    if query.is_empty() {
        return (StatusCode::OK, Json(json!({ "entries": [], "count": 0 }))).into_response();
    }

    match state.chain.memory().retrieve(&query).await {
        Ok(matches) => {
            let limit = params.limit.unwrap_or(10);
            let entries: Vec<serde_json::Value> = matches
                .iter()
                .take(limit)
                .map(|m| {
                    json!({
                        "content": m.text,
                        "score": m.score,
                        "metadata": m.metadata,
                    })
                })
                .collect();
            let count = entries.len();
            (StatusCode::OK, Json(json!({ "entries": entries, "count": count }))).into_response()
        }
        Err(e) => {
            warn!(channel_id = %state.channel_id, "memory lookup failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("memory_error", e)).into_response()
        }
    }
}

/// POST /api/reset — clear the conversation window.
async fn reset(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    state.chain.reset().await;
    (
        StatusCode::OK,
        Json(json!({ "message": "chat history reset", "success": true })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::providers;
    use crate::memory::MemoryClient;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_state(token: Option<&str>) -> HttpState {
        let cfg = Config::test_default();
        // Port 1 memory: unreachable, every turn degrades to no context.
        let mut mem_cfg = cfg.memory.clone();
        mem_cfg.port = 1;
        let chain = crate::chain::Chain::new(
            providers::build(&cfg.llm).unwrap(),
            MemoryClient::new(&mem_cfg),
            None,
            cfg.search.threshold,
        );
        HttpState {
            channel_id: Arc::from("http0"),
            chain: Arc::new(chain),
            token: token.map(Arc::from),
            debug: false,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let router = build_router(test_state(Some("secret")));
        let response = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn chat_without_token_is_unauthorized() {
        let router = build_router(test_state(Some("secret")));
        let response = router
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chat_with_wrong_token_is_unauthorized() {
        let router = build_router(test_state(Some("secret")));
        let response = router
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer nope")
                    .body(Body::from(r#"{"query":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chat_with_token_round_trips() {
        let router = build_router(test_state(Some("secret")));
        let response = router
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer secret")
                    .body(Body::from(r#"{"query":"hello there"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["response"].as_str().unwrap().contains("hello there"));
    }

    #[tokio::test]
    async fn chat_without_configured_token_is_open() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn search_disabled_is_503() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(
                Request::post("/api/search")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"rust"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn memory_lookup_failure_is_bad_gateway() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(
                Request::get("/api/memory?query=deadline")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn memory_without_query_returns_empty() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(Request::get("/api/memory").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["count"], 0);
    }

    #[tokio::test]
    async fn reset_succeeds() {
        let router = build_router(test_state(None));
        let response = router
            .oneshot(Request::post("/api/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);
    }
}
