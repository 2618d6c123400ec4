use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::Content;
use crate::errors::ToolError;

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    #[serde(default)]
    pub description: String,
    /// A JSON Schema object defining the expected parameters for the tool
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier of the call, unique within one assistant turn
    pub id: String,
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<I: Into<String>, S: Into<String>>(id: I, name: S, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of executing a [`ToolCall`], tied back to it by id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: Vec<Content>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success<S: Into<String>>(tool_call_id: S, output: Vec<Content>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output,
            is_error: false,
        }
    }

    /// An error-flagged result carrying a message the model can read
    pub fn error<S: Into<String>>(tool_call_id: S, error: &ToolError) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: vec![Content::text(format!(
                "The tool call returned the following error:\n{}",
                error
            ))],
            is_error: true,
        }
    }

    /// Render the output as the text of a tool message.
    ///
    /// Blocks hidden from the assistant are dropped and images are replaced
    /// with a placeholder line, since tool messages only carry text.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .filter(|content| content.visible_to_assistant())
            .map(|content| match content {
                Content::Text(text) => text.text.clone(),
                Content::Image(image) => format!(
                    "This tool result included an image ({}) that cannot be displayed.",
                    image.mime_type
                ),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use serde_json::json;

    #[test]
    fn test_tool_deserializes_from_mcp_listing() -> anyhow::Result<()> {
        let tool: Tool = serde_json::from_value(json!({
            "name": "playwright_navigate",
            "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}}
        }))?;
        assert_eq!(tool.name, "playwright_navigate");
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["properties"]["url"]["type"], "string");
        Ok(())
    }

    #[test]
    fn test_output_text_joins_visible_blocks() {
        let result = ToolResult::success(
            "c1",
            vec![
                Content::text("Screenshot home taken"),
                Content::image("aGk=", "image/png"),
                Content::text("for the user only").with_audience(vec![Role::User]),
            ],
        );
        assert_eq!(
            result.output_text(),
            "Screenshot home taken\nThis tool result included an image (image/png) that cannot be displayed."
        );
    }

    #[test]
    fn test_error_result() {
        let result = ToolResult::error("c9", &ToolError::ToolNotFound("fly".into()));
        assert!(result.is_error);
        assert_eq!(result.tool_call_id, "c9");
        assert_eq!(
            result.output_text(),
            "The tool call returned the following error:\nTool not found: fly"
        );
    }
}
