use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::base::Provider;
use super::configs::AzureProviderConfig;
use super::utils::{create_request, send_request};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Azure OpenAI: the deployment selects the model and authentication uses
/// the `api-key` header instead of a bearer token.
pub struct AzureProvider {
    client: Client,
    config: AzureProviderConfig,
}

impl AzureProvider {
    pub fn new(config: AzureProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment
        )
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn model(&self) -> &str {
        &self.config.deployment
    }

    async fn complete(&self, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let payload = create_request(
            &self.config.deployment,
            messages,
            tools,
            self.config.temperature,
            self.config.max_tokens,
        )?;

        let request = self
            .client
            .post(self.url())
            .query(&[("api-version", self.config.api_version.as_str())])
            .header("api-key", &self.config.api_key);

        send_request(request, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::response::NormalizedResponse;
    use crate::providers::configs::DEFAULT_TIMEOUT;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_uses_deployment_route() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o-prod/chat/completions"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "azure-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "4"},
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = AzureProvider::new(AzureProviderConfig {
            endpoint: format!("{}/", mock_server.uri()),
            api_key: "azure-key".to_string(),
            api_version: "2024-06-01".to_string(),
            deployment: "gpt-4o-prod".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(2000),
            timeout: DEFAULT_TIMEOUT,
        })?;
        assert_eq!(provider.model(), "gpt-4o-prod");

        let raw = provider
            .complete(&[Message::user().with_text("What is 2+2?")], &[])
            .await?;
        let response = NormalizedResponse::from_completion(&raw)?;
        assert_eq!(response.content, "4");

        let requests = mock_server.received_requests().await.unwrap_or_default();
        let body: Value = serde_json::from_slice(&requests[0].body)?;
        assert_eq!(body["model"], "gpt-4o-prod");
        assert_eq!(body["max_tokens"], 2000);
        Ok(())
    }

    #[tokio::test]
    async fn test_unauthorized_is_reported() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&mock_server)
            .await;

        let provider = AzureProvider::new(AzureProviderConfig {
            endpoint: mock_server.uri(),
            api_key: "wrong".to_string(),
            api_version: "2024-06-01".to_string(),
            deployment: "d".to_string(),
            temperature: None,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        })?;

        let err = provider
            .complete(&[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Request failed: 401 Unauthorized: invalid key");
        Ok(())
    }
}
