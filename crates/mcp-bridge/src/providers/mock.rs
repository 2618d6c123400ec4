use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::Provider;

/// A mock provider that returns pre-configured completions for testing
#[derive(Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Result<Value, String>>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of raw completions
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().map(Ok).collect())),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Queue a transport failure instead of a completion
    pub fn with_failure(self, message: &str) -> Self {
        self.responses.lock().unwrap().push(Err(message.to_string()));
        self
    }

    /// Sleep before answering, to exercise timeouts and cancellation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Snapshots of the conversation sent with each request
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// A completion with plain text and `stop`
    pub fn text(content: &str) -> Value {
        json!({
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
    }

    /// A completion requesting the given `(id, name, arguments)` calls
    pub fn tool_calls(calls: &[(&str, &str, Value)]) -> Value {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|(id, name, arguments)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()}
                })
            })
            .collect();
        json!({
            "choices": [{
                "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
                "finish_reason": "tool_calls"
            }]
        })
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message], _tools: &[Tool]) -> Result<Value> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return an empty answer if no more pre-configured responses
            Ok(Self::text(""))
        } else {
            responses.remove(0).map_err(|e| anyhow!(e))
        }
    }
}
