use serde::{Deserialize, Serialize};

use super::role::Role;
use super::tool::{ToolCall, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single turn of the conversation
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            content: String::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// A tool message answering the call identified by `result.tool_call_id`
    pub fn tool_response(result: &ToolResult) -> Self {
        Message {
            role: Role::Tool,
            content: result.output_text(),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.tool_call_id.clone()),
            is_error: result.is_error,
        }
    }

    /// Append text to the message
    pub fn with_text<S: AsRef<str>>(mut self, text: S) -> Self {
        self.content.push_str(text.as_ref());
        self
    }

    /// Add a tool call to the message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    pub fn with_tool_calls<I: IntoIterator<Item = ToolCall>>(mut self, tool_calls: I) -> Self {
        self.tool_calls.extend(tool_calls);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
