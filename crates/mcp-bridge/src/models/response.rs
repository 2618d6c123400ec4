use serde_json::Value;
use tracing::debug;

use super::message::Message;
use super::tool::ToolCall;
use crate::errors::{BridgeError, BridgeResult};
use crate::providers::base::Usage;

/// Provider-agnostic view of a chat completion.
///
/// `content` is never absent (empty when the model produced no text) and
/// `tool_calls` is empty rather than missing when no tool was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
    pub is_tool_call: bool,
    pub usage: Option<Usage>,
}

impl NormalizedResponse {
    /// Normalize a raw OpenAI-style completion, reading only its first choice
    pub fn from_completion(completion: &Value) -> BridgeResult<Self> {
        let choice = completion
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| {
                BridgeError::MalformedResponse("completion contains no choices".to_string())
            })?;

        let message = choice.get("message").ok_or_else(|| {
            BridgeError::MalformedResponse("first choice carries no message".to_string())
        })?;

        let content = extract_text(message.get("content"));
        let tool_calls = match message.get("tool_calls") {
            Some(Value::Array(calls)) => calls
                .iter()
                .enumerate()
                .map(|(index, call)| parse_tool_call(index, call))
                .collect::<BridgeResult<Vec<_>>>()?,
            _ => Vec::new(),
        };

        let stop_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(String::from);
        let is_tool_call = stop_reason.as_deref() == Some("tool_calls");
        let usage = completion.get("usage").map(Usage::from_openai);

        debug!(
            content = %content,
            tool_calls = tool_calls.len(),
            stop_reason = ?stop_reason,
            "normalized completion"
        );

        Ok(Self {
            content,
            tool_calls,
            stop_reason,
            is_tool_call,
            usage,
        })
    }

    /// Whether the bridge must execute tools before the model can continue.
    ///
    /// Keyed on the calls themselves: some OpenAI-compatible endpoints report
    /// `stop` alongside tool calls, others `tool_calls` with none attached.
    pub fn requires_tool_execution(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The assistant turn to append to the conversation
    pub fn to_message(&self) -> Message {
        Message::assistant()
            .with_text(&self.content)
            .with_tool_calls(self.tool_calls.iter().cloned())
    }
}

/// Plain string content, or the concatenated text parts of array content
fn extract_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn parse_tool_call(index: usize, call: &Value) -> BridgeResult<ToolCall> {
    let function = call.get("function").ok_or_else(|| {
        BridgeError::MalformedResponse(format!("tool call {} has no function", index))
    })?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            BridgeError::MalformedResponse(format!("tool call {} has no function name", index))
        })?;
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("call_{}", index));

    // Arguments normally arrive as a JSON-encoded string. Anything that does
    // not decode is kept verbatim so it can be echoed back to the model.
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(Default::default()),
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(other) => other.clone(),
    };

    Ok(ToolCall::new(id, name, arguments))
}
