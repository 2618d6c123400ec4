use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::base::Provider;
use super::configs::OpenAiProviderConfig;
use super::utils::{create_request, send_request};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.host.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let payload = create_request(
            &self.config.model,
            messages,
            tools,
            self.config.temperature,
            self.config.max_tokens,
        )?;

        let request = self
            .client
            .post(self.url())
            .header("Authorization", format!("Bearer {}", self.config.api_key));

        send_request(request, &payload).await
    }
}
