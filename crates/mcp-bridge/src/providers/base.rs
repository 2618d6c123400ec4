use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Read an OpenAI `usage` object, deriving the total when it is missing
    pub fn from_openai(usage: &Value) -> Self {
        let read = |key: &str| usage.get(key).and_then(|v| v.as_i64()).map(|v| v as i32);

        let input_tokens = read("prompt_tokens");
        let output_tokens = read("completion_tokens");
        let total_tokens = read("total_tokens").or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

        Self::new(input_tokens, output_tokens, total_tokens)
    }
}

/// A chat-completion endpoint dialect (OpenAI, Azure OpenAI, ...).
///
/// Implementations own transport and authentication only: they receive the
/// whole conversation and return the provider's raw completion JSON, which
/// is normalized by the caller.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The model or deployment identifier sent with every request
    fn model(&self) -> &str;

    /// Send the conversation and the declared tools, returning the raw completion
    async fn complete(&self, messages: &[Message], tools: &[Tool]) -> Result<Value>;
}
