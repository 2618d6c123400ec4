pub mod bridge;
pub mod config;
pub mod errors;
pub mod llm_client;
pub mod models;
pub mod providers;
pub mod tools;

pub use bridge::Bridge;
pub use config::{BridgeConfig, LlmConfig, ToolBackendConfig};
pub use errors::{BridgeError, BridgeResult, ToolError};
