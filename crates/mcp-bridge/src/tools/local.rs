use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::client::ToolClient;
use crate::errors::{BridgeError, BridgeResult, ToolError};
use crate::models::content::Content;
use crate::models::tool::Tool;

/// A named group of tools executed in-process
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call one of this system's tools
    async fn call(&self, tool_name: &str, arguments: Value) -> Result<Vec<Content>, ToolError>;
}

/// Tool backend hosting [`System`]s in the same process.
///
/// Tools are exposed as `{system}__{tool}` so that systems may reuse tool
/// names without colliding.
#[derive(Default)]
pub struct LocalToolClient {
    systems: Vec<Box<dyn System>>,
    connected: bool,
}

impl LocalToolClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system to the backend
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    pub fn with_system(mut self, system: Box<dyn System>) -> Self {
        self.add_system(system);
        self
    }

    /// Get all tools from all systems with proper system prefixing
    fn get_prefixed_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for system in &self.systems {
            for tool in system.tools() {
                tools.push(Tool::new(
                    format!("{}__{}", system.name(), tool.name),
                    &tool.description,
                    tool.input_schema.clone(),
                ));
            }
        }
        tools
    }

    /// Find the system and tool name for a prefixed tool name
    fn resolve<'a>(&self, prefixed_name: &'a str) -> Option<(&dyn System, &'a str)> {
        let (system_name, tool_name) = prefixed_name.split_once("__")?;
        let system = self.systems.iter().find(|sys| sys.name() == system_name)?;
        system
            .tools()
            .iter()
            .any(|tool| tool.name == tool_name)
            .then_some((&**system, tool_name))
    }
}

#[async_trait]
impl ToolClient for LocalToolClient {
    async fn connect(&mut self) -> BridgeResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn list_tools(&self) -> BridgeResult<Vec<Tool>> {
        if !self.connected {
            return Err(BridgeError::ToolBackendUnavailable(
                "local tools are not connected".to_string(),
            ));
        }
        Ok(self.get_prefixed_tools())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<Content>, ToolError> {
        if !self.connected {
            return Err(ToolError::Unavailable(
                "local tools are not connected".to_string(),
            ));
        }
        let (system, tool_name) = self
            .resolve(name)
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;

        debug!(system = system.name(), tool = tool_name, "dispatching local tool call");
        system.call(tool_name, arguments).await
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.connected = false;
        Ok(())
    }
}
