use tracing::{debug, info};

use crate::errors::{BridgeError, BridgeResult};
use crate::models::conversation::Conversation;
use crate::models::message::Message;
use crate::models::response::NormalizedResponse;
use crate::models::tool::{Tool, ToolResult};
use crate::providers::base::Provider;

/// Sends a conversation to the model and records the reply in it.
///
/// The client never owns the conversation; the caller passes it in for each
/// call. A failed call leaves the conversation exactly as it was.
pub struct LlmClient {
    provider: Box<dyn Provider>,
    tools: Vec<Tool>,
}

impl LlmClient {
    pub fn new(provider: Box<dyn Provider>, tools: Vec<Tool>) -> Self {
        Self { provider, tools }
    }

    /// The model or deployment name every request is sent to
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Append one `tool` message per result, then ask the model to continue
    pub async fn invoke(
        &self,
        conversation: &mut Conversation,
        tool_results: &[ToolResult],
    ) -> BridgeResult<NormalizedResponse> {
        let mark = conversation.len();
        for result in tool_results {
            conversation.push(Message::tool_response(result));
        }

        let outcome = self.complete(conversation).await;
        if outcome.is_err() {
            conversation.truncate(mark);
        }
        outcome
    }

    /// Append a user turn with `text`, then ask the model to respond
    pub async fn invoke_with_prompt(
        &self,
        conversation: &mut Conversation,
        text: &str,
    ) -> BridgeResult<NormalizedResponse> {
        let mark = conversation.len();
        conversation.push(Message::user().with_text(text));

        let outcome = self.complete(conversation).await;
        if outcome.is_err() {
            conversation.truncate(mark);
        }
        outcome
    }

    async fn complete(&self, conversation: &mut Conversation) -> BridgeResult<NormalizedResponse> {
        let raw = self
            .provider
            .complete(conversation.messages(), &self.tools)
            .await
            .map_err(BridgeError::llm)?;
        debug!(completion = %raw, "raw completion");

        let response = NormalizedResponse::from_completion(&raw)?;
        if let Some(usage) = response.usage {
            info!(
                model = self.provider.model(),
                input_tokens = ?usage.input_tokens,
                output_tokens = ?usage.output_tokens,
                total_tokens = ?usage.total_tokens,
                "model usage"
            );
        }

        conversation.push(response.to_message());
        Ok(response)
    }
}
