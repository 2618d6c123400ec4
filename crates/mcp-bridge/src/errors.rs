use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a tool backend for a single call.
///
/// Everything except `Unavailable` is recovered by the bridge and fed back
/// to the model as an error-flagged tool result.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Tool backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors that escape the bridge's caller-facing operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge is not open")]
    BridgeNotOpen,

    #[error("Bridge has been closed and cannot be reopened")]
    BridgeClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM invocation failed: {source}")]
    LlmInvocation {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Tool backend unavailable: {0}")]
    ToolBackendUnavailable(String),

    #[error("Tool loop exceeded {rounds} rounds without a final answer")]
    ToolLoopExceeded { rounds: usize },
}

impl BridgeError {
    pub fn llm<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        BridgeError::LlmInvocation { source: err.into() }
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
