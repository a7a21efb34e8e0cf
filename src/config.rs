//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `MEMOSEARCH_LOG_LEVEL` env overrides. Every value has a
//! compiled default, so the file itself is optional — running with no config
//! at all targets local services on their stock ports.
//!
//! The API bearer token is sourced from the `API_TOKEN` env var only, never
//! from TOML.

use std::{env, fs, path::{Path, PathBuf}};

use serde::Deserialize;

use crate::error::AppError;

/// Memory service (OpenMemory-style) configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub host: String,
    pub port: u16,
    /// Collection holding this assistant's interaction history.
    pub collection: String,
    /// Number of matches to retrieve per query.
    pub top_k: usize,
    /// Minimum similarity score for a match to be used.
    pub similarity_threshold: f32,
    /// Similarity metric requested from the service (cosine, dot, euclidean).
    pub similarity_metric: String,
}

impl MemoryConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Web search service (Perplexica-style) configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Whether web search is consulted at all.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Cap on results per search call.
    pub max_results: usize,
    /// Dual-purpose threshold: a turn searches when its best memory
    /// similarity falls below this, and results scoring below it are dropped.
    pub threshold: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

impl SearchConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// LLM runtime configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (e.g. `"dummy"`, `"ollama"`).
    pub provider: String,
    /// Model name passed in the request body.
    pub model: String,
    pub host: String,
    pub port: u16,
    /// Sampling temperature.
    pub temperature: f32,
    /// Top-p (nucleus) sampling parameter.
    pub top_p: f32,
    /// Generation cap, forwarded as `num_predict`.
    pub max_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

impl LlmConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Inbound HTTP API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Whether the HTTP channel is explicitly enabled.
    pub enabled: bool,
    /// Socket address to bind the HTTP listener to.
    pub bind: String,
    /// Log request/response payloads at debug level.
    pub debug: bool,
}

/// Console channel configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Whether the console channel is explicitly enabled.
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    /// Optional append-mode log file (already expanded, no `~`).
    pub file: Option<PathBuf>,
}

/// Fully-resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub memory: MemoryConfig,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub api: ApiConfig,
    pub console: ConsoleConfig,
    pub log: LogConfig,
    /// Bearer token for the HTTP API from the `API_TOKEN` env var —
    /// `None` disables the auth check. Never sourced from TOML.
    pub api_token: Option<String>,
}

// ── Raw TOML shape — `serde` target before resolution ─────────────────────────

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    memory: RawMemory,
    #[serde(default)]
    search: RawSearch,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    api: RawApi,
    #[serde(default)]
    console: RawConsole,
    #[serde(default)]
    log: RawLog,
}

#[derive(Deserialize)]
struct RawMemory {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_memory_port")]
    port: u16,
    #[serde(default = "default_memory_collection")]
    collection: String,
    #[serde(default = "default_memory_top_k")]
    top_k: usize,
    #[serde(default = "default_memory_similarity_threshold")]
    similarity_threshold: f32,
    #[serde(default = "default_memory_similarity_metric")]
    similarity_metric: String,
}

#[derive(Deserialize)]
struct RawSearch {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_search_port")]
    port: u16,
    #[serde(default = "default_search_max_results")]
    max_results: usize,
    #[serde(default = "default_search_threshold")]
    threshold: f32,
    #[serde(default = "default_search_timeout_seconds")]
    timeout_seconds: u64,
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(default = "default_llm_provider")]
    provider: String,
    #[serde(default = "default_llm_model")]
    model: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_llm_port")]
    port: u16,
    #[serde(default = "default_llm_temperature")]
    temperature: f32,
    #[serde(default = "default_llm_top_p")]
    top_p: f32,
    #[serde(default = "default_llm_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_llm_timeout_seconds")]
    timeout_seconds: u64,
}

#[derive(Deserialize)]
struct RawApi {
    /// Defaults to `false`: the HTTP API must be explicitly enabled.
    #[serde(default = "default_false")]
    enabled: bool,
    #[serde(default = "default_api_bind")]
    bind: String,
    #[serde(default = "default_false")]
    debug: bool,
}

#[derive(Deserialize)]
struct RawConsole {
    /// Defaults to `true`: the console is the primary surface.
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Deserialize)]
struct RawLog {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default)]
    file: Option<String>,
}

impl Default for RawLog {
    fn default() -> Self {
        Self { level: default_log_level(), file: None }
    }
}

impl Default for RawMemory {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_memory_port(),
            collection: default_memory_collection(),
            top_k: default_memory_top_k(),
            similarity_threshold: default_memory_similarity_threshold(),
            similarity_metric: default_memory_similarity_metric(),
        }
    }
}

impl Default for RawSearch {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_search_port(),
            max_results: default_search_max_results(),
            threshold: default_search_threshold(),
            timeout_seconds: default_search_timeout_seconds(),
        }
    }
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            host: default_host(),
            port: default_llm_port(),
            temperature: default_llm_temperature(),
            top_p: default_llm_top_p(),
            max_tokens: default_llm_max_tokens(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

impl Default for RawApi {
    fn default() -> Self {
        Self { enabled: false, bind: default_api_bind(), debug: false }
    }
}

impl Default for RawConsole {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_host() -> String { "localhost".to_string() }
fn default_memory_port() -> u16 { 5000 }
fn default_memory_collection() -> String { "memosearch".to_string() }
fn default_memory_top_k() -> usize { 5 }
fn default_memory_similarity_threshold() -> f32 { 0.7 }
fn default_memory_similarity_metric() -> String { "cosine".to_string() }
fn default_search_port() -> u16 { 5001 }
fn default_search_max_results() -> usize { 5 }
fn default_search_threshold() -> f32 { 0.5 }
fn default_search_timeout_seconds() -> u64 { 10 }
fn default_llm_provider() -> String { "ollama".to_string() }
fn default_llm_model() -> String { "gemma:3b".to_string() }
fn default_llm_port() -> u16 { 11434 }
fn default_llm_temperature() -> f32 { 0.7 }
fn default_llm_top_p() -> f32 { 0.9 }
fn default_llm_max_tokens() -> u32 { 2048 }
fn default_llm_timeout_seconds() -> u64 { 60 }
fn default_api_bind() -> String { "127.0.0.1:5002".to_string() }
fn default_log_level() -> String { "info".to_string() }

fn default_true() -> bool { true }
fn default_false() -> bool { false }

// ── Loading ───────────────────────────────────────────────────────────────────

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Load config, then apply env-var overrides.
///
/// With an explicit `config_path` a missing file is an error; the default
/// path is allowed to be absent (compiled defaults apply).
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let log_level_override = env::var("MEMOSEARCH_LOG_LEVEL").ok();
    load_from(
        config_path.map(Path::new).unwrap_or(Path::new(DEFAULT_CONFIG_PATH)),
        config_path.is_some(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    path_is_explicit: bool,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let parsed: RawConfig = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?,
        Err(e) if !path_is_explicit && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file — using compiled defaults");
            RawConfig::default()
        }
        Err(e) => {
            return Err(AppError::Config(format!("cannot read {}: {e}", path.display())));
        }
    };

    let log_level = log_level_override
        .map(str::to_string)
        .unwrap_or(parsed.log.level);

    Ok(Config {
        memory: MemoryConfig {
            host: parsed.memory.host,
            port: parsed.memory.port,
            collection: parsed.memory.collection,
            top_k: parsed.memory.top_k,
            similarity_threshold: parsed.memory.similarity_threshold,
            similarity_metric: parsed.memory.similarity_metric,
        },
        search: SearchConfig {
            enabled: parsed.search.enabled,
            host: parsed.search.host,
            port: parsed.search.port,
            max_results: parsed.search.max_results,
            threshold: parsed.search.threshold,
            timeout_seconds: parsed.search.timeout_seconds,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            model: parsed.llm.model,
            host: parsed.llm.host,
            port: parsed.llm.port,
            temperature: parsed.llm.temperature,
            top_p: parsed.llm.top_p,
            max_tokens: parsed.llm.max_tokens,
            timeout_seconds: parsed.llm.timeout_seconds,
        },
        api: ApiConfig {
            enabled: parsed.api.enabled,
            bind: parsed.api.bind,
            debug: parsed.api.debug,
        },
        console: ConsoleConfig {
            enabled: parsed.console.enabled,
        },
        log: LogConfig {
            level: log_level,
            file: parsed.log.file.as_deref().map(expand_home),
        },
        api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — dummy LLM, no tokens, no external calls.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            memory: MemoryConfig {
                host: "localhost".into(),
                port: 0,
                collection: "test".into(),
                top_k: 5,
                similarity_threshold: 0.7,
                similarity_metric: "cosine".into(),
            },
            search: SearchConfig {
                enabled: true,
                host: "localhost".into(),
                port: 0,
                max_results: 5,
                threshold: 0.5,
                timeout_seconds: 1,
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                model: "test-model".into(),
                host: "localhost".into(),
                port: 0,
                temperature: 0.0,
                top_p: 1.0,
                max_tokens: 64,
                timeout_seconds: 1,
            },
            api: ApiConfig {
                enabled: false,
                bind: default_api_bind(),
                debug: false,
            },
            console: ConsoleConfig { enabled: true },
            log: LogConfig { level: "info".into(), file: None },
            api_token: None,
        }
    }
}
