use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{BridgeResult, ToolError};
use crate::models::content::Content;
use crate::models::tool::Tool;

/// A session with a tool-execution backend
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Establish the session. Calling it on a connected client is a no-op.
    ///
    /// Fails with `ToolBackendUnavailable` when the backend cannot be reached.
    async fn connect(&mut self) -> BridgeResult<()>;

    /// The tools the backend currently exposes
    async fn list_tools(&self) -> BridgeResult<Vec<Tool>>;

    /// Invoke `name` with `arguments`, which are passed through unvalidated
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<Content>, ToolError>;

    /// Release the session. Closing twice is harmless.
    async fn close(&mut self) -> BridgeResult<()>;
}
