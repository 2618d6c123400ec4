use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};

use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message.role {
            Role::Assistant if message.has_tool_calls() => {
                let tool_calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&call.name),
                                "arguments": encode_arguments(&call.arguments),
                            }
                        })
                    })
                    .collect();
                let content = if message.content.is_empty() {
                    Value::Null
                } else {
                    json!(message.content)
                };
                json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": tool_calls,
                })
            }
            Role::Tool => json!({
                "role": "tool",
                "content": message.content,
                "tool_call_id": message.tool_call_id,
            }),
            role => json!({
                "role": role,
                "content": message.content,
            }),
        })
        .collect()
}

/// Arguments decoded from the model are re-encoded; raw strings that never
/// decoded are sent back untouched.
fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        let name = sanitize_function_name(&tool.name);
        if !tool_names.insert(name.clone()) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Assemble a chat-completion request body
pub fn create_request(
    model: &str,
    messages: &[Message],
    tools: &[Tool],
    temperature: Option<f64>,
    max_tokens: Option<i32>,
) -> Result<Value> {
    let mut payload = json!({
        "model": model,
        "messages": messages_to_openai_spec(messages),
    });
    let body = payload
        .as_object_mut()
        .ok_or_else(|| anyhow!("request payload is not an object"))?;

    if !tools.is_empty() {
        body.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
    }
    if let Some(temp) = temperature {
        body.insert("temperature".to_string(), json!(temp));
    }
    if let Some(tokens) = max_tokens {
        body.insert("max_tokens".to_string(), json!(tokens));
    }

    Ok(payload)
}

/// Send a prepared request and return the completion body.
///
/// Non-success statuses and embedded `error` objects are turned into errors.
pub async fn send_request(request: RequestBuilder, payload: &Value) -> Result<Value> {
    let response = request.json(payload).send().await?;

    let body: Value = match response.status() {
        StatusCode::OK => response.json().await?,
        status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
            let err_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Server error: {}: {}", status, err_text));
        }
        status => {
            let err_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Request failed: {}: {}", status, err_text));
        }
    };

    if let Some(error) = body.get("error") {
        if let Some(err) = check_openai_context_length_error(error) {
            return Err(err.into());
        }
        return Err(anyhow!("API error: {}", error));
    }

    Ok(body)
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
