//! Console channel — reads lines from stdin, runs a turn, prints the reply
//! to stdout.
//!
//! Implements [`Component`] so the channel set can spawn it as an
//! independent task. Runs until the `shutdown` token is cancelled (Ctrl-C),
//! stdin is closed, or the user types an exit command.
//!
//! `reset`/`clear` clear the conversation window without running a turn;
//! LLM failures print a visible error line and the loop continues.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};

// ── ConsoleChannel ────────────────────────────────────────────────────────────

pub struct ConsoleChannel {
    channel_id: String,
    chain: Arc<Chain>,
}

impl ConsoleChannel {
    pub fn new(channel_id: impl Into<String>, chain: Arc<Chain>) -> Self {
        Self { channel_id: channel_id.into(), chain }
    }
}

impl Component for ConsoleChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_console(self.channel_id, self.chain, shutdown))
    }
}

// ── run_console ───────────────────────────────────────────────────────────────

async fn run_console(
    channel_id: String,
    chain: Arc<Chain>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    info!(%channel_id, "console channel started");
    println!("─────────────────────────────────────");
    println!(" memosearch console  (Ctrl-C to quit)");
    println!("─────────────────────────────────────");
    println!("Type a question and press Enter. 'reset' clears history, 'exit' quits.");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        print!("> ");
        use std::io::Write as _;
        let _ = std::io::stdout().flush();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!("\n[console] shutdown signal received — closing");
                info!("console channel shutting down");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Err(e) => {
                        warn!("console read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("console stdin closed");
                        break;
                    }
                    Ok(Some(input)) => {
                        let input = input.trim().to_string();
                        if input.is_empty() { continue; }

                        match input.to_lowercase().as_str() {
                            "exit" | "quit" | "q" | "bye" => {
                                println!("Goodbye!");
                                break;
                            }
                            "reset" | "clear" => {
                                chain.reset().await;
                                println!("Chat history reset.");
                                continue;
                            }
                            _ => {}
                        }

                        debug!(input = %input, "console received line");

                        match chain.turn(&input).await {
                            Ok(reply) => println!("{reply}"),
                            // Terminal turn failure — report and keep the loop alive.
                            Err(e) => println!("error: {e}"),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
