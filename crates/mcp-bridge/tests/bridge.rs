use anyhow::Result;
use async_trait::async_trait;
use mcp_bridge::models::content::Content;
use mcp_bridge::models::role::Role;
use mcp_bridge::models::tool::Tool;
use mcp_bridge::tools::{LocalToolClient, System};
use mcp_bridge::{Bridge, BridgeConfig, BridgeError, LlmConfig, ToolError};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct WeatherSystem {
    tools: Vec<Tool>,
}

impl WeatherSystem {
    fn new() -> Self {
        Self {
            tools: vec![Tool::new(
                "forecast",
                "Get the forecast for a city",
                json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }),
            )],
        }
    }
}

#[async_trait]
impl System for WeatherSystem {
    fn name(&self) -> &str {
        "weather"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_name: &str, arguments: Value) -> Result<Vec<Content>, ToolError> {
        match (tool_name, arguments.get("city").and_then(Value::as_str)) {
            ("forecast", Some("Paris")) => Ok(vec![Content::text("sunny")]),
            ("forecast", Some(city)) => Err(ToolError::ExecutionError(format!(
                "no forecast for {}",
                city
            ))),
            _ => Err(ToolError::InvalidParameters("city is required".to_string())),
        }
    }
}

fn completion(message: Value, finish_reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 20, "completion_tokens": 5, "total_tokens": 25}
    }))
}

fn local_tools() -> Box<LocalToolClient> {
    Box::new(LocalToolClient::new().with_system(Box::new(WeatherSystem::new())))
}

#[tokio::test]
async fn test_tool_round_against_openai_endpoint() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(completion(
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "weather__forecast", "arguments": "{\"city\":\"Paris\"}"}
                }]
            }),
            "tool_calls",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion(
            json!({"role": "assistant", "content": "It is sunny in Paris."}),
            "stop",
        ))
        .mount(&server)
        .await;

    let config = BridgeConfig::new(
        LlmConfig::openai("test-key", "gpt-4o").with_base_url(format!("{}/v1", server.uri())),
    )
    .with_system_prompt("You are a helpful assistant.");
    let mut bridge = Bridge::new(&config, local_tools());

    bridge.open().await?;
    assert_eq!(bridge.tools()[0].name, "weather__forecast");

    let answer = bridge.process_message("What's the weather in Paris?").await?;
    assert_eq!(answer, "It is sunny in Paris.");

    let roles: Vec<Role> = bridge
        .conversation()
        .map(|c| c.messages().iter().map(|m| m.role).collect())
        .unwrap_or_default();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    let first: Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(first["model"], "gpt-4o");
    assert_eq!(first["temperature"], 0.7);
    assert_eq!(first["max_tokens"], 2000);
    assert_eq!(first["tools"][0]["function"]["name"], "weather__forecast");

    let second: Value = serde_json::from_slice(&requests[1].body)?;
    let messages = second["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(
        messages[3],
        json!({"role": "tool", "content": "sunny", "tool_call_id": "call_1"})
    );

    bridge.close().await?;
    assert!(matches!(bridge.close().await, Err(BridgeError::BridgeNotOpen)));
    Ok(())
}

#[tokio::test]
async fn test_tool_error_reaches_model() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(
            json!({
                "role": "assistant",
                "content": "Let me check.",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "weather__forecast", "arguments": "{\"city\":\"Atlantis\"}"}
                }]
            }),
            "tool_calls",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(completion(
            json!({"role": "assistant", "content": "I could not find Atlantis."}),
            "stop",
        ))
        .mount(&server)
        .await;

    let config = BridgeConfig::new(LlmConfig::openai("test-key", "gpt-4o").with_base_url(server.uri()));
    let mut bridge = Bridge::new(&config, local_tools());
    bridge.open().await?;

    let answer = bridge.process_message("Weather in Atlantis?").await?;
    assert_eq!(answer, "I could not find Atlantis.");

    let conversation = bridge.conversation().map(|c| c.messages().to_vec()).unwrap_or_default();
    assert_eq!(conversation[1].content, "Let me check.");
    assert!(conversation[2].is_error);
    assert!(conversation[2].content.contains("no forecast for Atlantis"));

    bridge.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_azure_dialect() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o-prod/chat/completions"))
        .and(query_param("api-version", "2024-06-01"))
        .and(header("api-key", "azure-key"))
        .respond_with(completion(json!({"role": "assistant", "content": "4"}), "stop"))
        .expect(1)
        .mount(&server)
        .await;

    let config = BridgeConfig::new(LlmConfig::azure(
        "azure-key",
        server.uri(),
        "2024-06-01",
        "gpt-4o-prod",
    ))
    .with_system_prompt("You are a helpful assistant.");
    let mut bridge = Bridge::new(&config, local_tools());
    bridge.open().await?;

    assert_eq!(bridge.process_message("What is 2+2?").await?, "4");
    assert_eq!(bridge.conversation().map(|c| c.len()), Some(3));
    bridge.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_provider_failure_keeps_session_usable() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(completion(json!({"role": "assistant", "content": "Hello!"}), "stop"))
        .mount(&server)
        .await;

    let config = BridgeConfig::new(LlmConfig::openai("test-key", "gpt-4o").with_base_url(server.uri()));
    let mut bridge = Bridge::new(&config, local_tools());
    bridge.open().await?;

    let err = bridge.process_message("Hi").await.unwrap_err();
    assert!(matches!(err, BridgeError::LlmInvocation { .. }));
    assert!(err.to_string().contains("upstream exploded"));
    assert_eq!(bridge.conversation().map(|c| c.len()), Some(0));

    // retrying the whole message works and leaves no duplicate user turn
    assert_eq!(bridge.process_message("Hi").await?, "Hello!");
    assert_eq!(bridge.conversation().map(|c| c.len()), Some(2));
    bridge.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_credentials_fail_at_open() {
    let config = BridgeConfig::new(LlmConfig::default());
    let mut bridge = Bridge::new(&config, local_tools());

    let err = bridge.open().await.unwrap_err();
    assert!(matches!(err, BridgeError::Config(_)));
    assert!(!bridge.is_open());
}
