mod client;
pub mod local;
pub mod mcp;

#[cfg(test)]
pub mod mock;

pub use client::ToolClient;
pub use local::{LocalToolClient, System};
pub use mcp::McpClient;
