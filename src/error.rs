//! Application-wide error types.
//!
//! Client-level failures (LLM, memory, search) have their own error enums in
//! their modules; `AppError` covers startup and channel lifecycle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
