//! Memosearch entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Build clients, ensure the memory collection, probe the LLM
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run channels (drives the console / HTTP API until shutdown)

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use memosearch::chain::Chain;
use memosearch::channels;
use memosearch::config::{self, Config};
use memosearch::error::AppError;
use memosearch::llm::providers;
use memosearch::logger;
use memosearch::memory::MemoryClient;
use memosearch::search::SearchClient;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let mut config = config::load(args.config_path.as_deref())?;

    // --serve runs the HTTP API headless; the console stays off.
    if args.serve {
        config.api.enabled = true;
        config.console.enabled = false;
    }

    let effective_log_level = args.log_level.unwrap_or(config.log.level.as_str());
    let force_cli_level = args.log_level.is_some();

    logger::init(effective_log_level, force_cli_level, config.log.file.as_deref())?;

    info!(
        llm_provider = %config.llm.provider,
        llm_model = %config.llm.model,
        memory = %config.memory.base_url(),
        search = %config.search.base_url(),
        configured_log_level = %config.log.level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    // Build the external-service clients.
    let memory = MemoryClient::new(&config.memory);
    let search = if config.search.enabled {
        Some(
            SearchClient::new(&config.search)
                .map_err(|e| AppError::Config(e.to_string()))?,
        )
    } else {
        None
    };
    let llm = providers::build(&config.llm).map_err(|e| AppError::Config(e.to_string()))?;

    // Both probes are soft: the services may come up later, and every turn
    // degrades or fails visibly on its own.
    if let Err(e) = memory.ensure_collection().await {
        warn!("memory collection setup failed (continuing): {e}");
    }
    if let Err(e) = llm.ping().await {
        warn!("llm endpoint unreachable (continuing): {e}");
    }

    let chain = Arc::new(Chain::new(llm, memory, search, config.search.threshold));

    // Shared shutdown token — Ctrl-C cancels it, all tasks watch it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    if config.console.enabled {
        print_startup_summary(&config);
    }

    let result = channels::start(&config, chain, shutdown.clone()).join().await;

    // If channels exited on their own (EOF, error), still signal everything.
    shutdown.cancel();

    result
}

fn print_startup_summary(config: &Config) {
    println!("memosearch v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  llm:    provider={} model={} temp={} timeout={}s",
        config.llm.provider, config.llm.model, config.llm.temperature, config.llm.timeout_seconds
    );
    println!(
        "  memory: {} collection={} top_k={} threshold={}",
        config.memory.base_url(),
        config.memory.collection,
        config.memory.top_k,
        config.memory.similarity_threshold
    );
    if config.search.enabled {
        println!(
            "  search: {} max_results={} timeout={}s",
            config.search.base_url(),
            config.search.max_results,
            config.search.timeout_seconds
        );
    } else {
        println!("  search: disabled");
    }
    if config.api.enabled {
        println!("  http:   {}", config.api.bind);
    } else {
        println!("  http:   disabled");
    }
}

struct CliArgs {
    log_level: Option<&'static str>,
    serve: bool,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut serve = false;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: memosearch [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("      --version              Print version");
                println!("      --serve                Run the HTTP API instead of the console");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "--version" => {
                println!("memosearch v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--serve" => serve = true,
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // Each -v raises verbosity one tier from the config default:
    //   -v      → warn   (suppress info noise, show warnings+errors only)
    //   -vv     → info   (normal operational output)
    //   -vvv    → debug  (flow-level diagnostics: turn stages, client calls)
    //   -vvvv+  → trace  (full payload dumps, very verbose)
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, serve, config_path }
}
