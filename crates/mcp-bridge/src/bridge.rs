use std::ops::{Deref, DerefMut};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::errors::{BridgeError, BridgeResult, ToolError};
use crate::llm_client::LlmClient;
use crate::models::conversation::Conversation;
use crate::models::tool::{Tool, ToolCall, ToolResult};
use crate::providers::base::Provider;
use crate::providers::factory::get_provider;
use crate::providers::utils::{is_valid_function_name, sanitize_function_name, tools_to_openai_spec};
use crate::tools::{McpClient, ToolClient};

struct Session {
    llm: LlmClient,
    conversation: Conversation,
}

enum State {
    Idle,
    Open(Session),
    Closed,
}

/// Drives the conversation between a model and a tool backend.
///
/// A bridge is opened once, processes messages one at a time and, once
/// closed, stays closed. The configuration is borrowed for the bridge's
/// whole lifetime.
pub struct Bridge<'a> {
    config: &'a BridgeConfig,
    tool_client: Box<dyn ToolClient>,
    provider: Option<Box<dyn Provider>>,
    state: State,
}

impl<'a> Bridge<'a> {
    pub fn new(config: &'a BridgeConfig, tool_client: Box<dyn ToolClient>) -> Self {
        Self {
            config,
            tool_client,
            provider: None,
            state: State::Idle,
        }
    }

    /// A bridge to the MCP server described by `config.backend`
    pub fn from_config(config: &'a BridgeConfig) -> BridgeResult<Self> {
        let backend = config
            .backend
            .as_ref()
            .ok_or_else(|| BridgeError::Config("no tool backend configured".to_string()))?;
        Ok(Self::new(config, Box::new(McpClient::from_config(backend))))
    }

    /// Use `provider` instead of building one from the configuration
    pub fn with_provider(mut self, provider: Box<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// The conversation so far, while the bridge is open
    pub fn conversation(&self) -> Option<&Conversation> {
        match &self.state {
            State::Open(session) => Some(&session.conversation),
            _ => None,
        }
    }

    /// The tools offered to the model, while the bridge is open
    pub fn tools(&self) -> &[Tool] {
        match &self.state {
            State::Open(session) => session.llm.tools(),
            _ => &[],
        }
    }

    /// Connect the tool backend and start a conversation.
    ///
    /// The configuration is validated before anything is connected. If the
    /// backend connects but cannot list its tools it is closed again.
    pub async fn open(&mut self) -> BridgeResult<()> {
        match self.state {
            State::Open(_) => return Ok(()),
            State::Closed => return Err(BridgeError::BridgeClosed),
            State::Idle => {}
        }

        let provider_config = self.config.validate()?;
        let dialect = provider_config.provider_type();
        let provider = match self.provider.take() {
            Some(provider) => provider,
            None => get_provider(provider_config).map_err(|e| BridgeError::Config(e.to_string()))?,
        };

        let tools = match self.connect_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                self.provider = Some(provider);
                return Err(err);
            }
        };

        let llm = LlmClient::new(provider, tools);
        info!(
            provider = %dialect,
            model = llm.model(),
            tools = llm.tools().len(),
            "bridge opened"
        );
        self.state = State::Open(Session {
            llm,
            conversation: Conversation::new(self.config.system_prompt.as_deref()),
        });
        Ok(())
    }

    async fn connect_tools(&mut self) -> BridgeResult<Vec<Tool>> {
        let listed = match self.tool_client.connect().await {
            Ok(()) => self.tool_client.list_tools().await,
            Err(err) => Err(err),
        };
        let checked = listed.and_then(|tools| {
            tools_to_openai_spec(&tools).map_err(|e| {
                BridgeError::ToolBackendUnavailable(format!("unusable tool list: {}", e))
            })?;
            Ok(tools)
        });

        if checked.is_err() {
            if let Err(e) = self.tool_client.close().await {
                warn!("failed to close tool backend after open failure: {}", e);
            }
        }
        checked
    }

    /// Send `text` to the model and run tool rounds until it answers.
    ///
    /// When an error escapes, or the returned future is dropped before it
    /// completes, the conversation is restored to what it was before the call.
    /// Losing the tool backend also closes the bridge.
    pub async fn process_message(&mut self, text: &str) -> BridgeResult<String> {
        let outcome = self.exchange(text).await;
        if let Err(BridgeError::ToolBackendUnavailable(message)) = &outcome {
            warn!(error = %message, "tool backend lost, closing bridge");
            if let Err(e) = self.close().await {
                warn!("failed to close tool backend: {}", e);
            }
        }
        outcome
    }

    async fn exchange(&mut self, text: &str) -> BridgeResult<String> {
        let config = self.config;
        let tool_client = self.tool_client.as_ref();
        let session = match &mut self.state {
            State::Open(session) => session,
            State::Idle | State::Closed => return Err(BridgeError::BridgeNotOpen),
        };
        let llm = &session.llm;
        let mut conversation = Checkpoint::new(&mut session.conversation);

        let mut response = llm.invoke_with_prompt(&mut conversation, text).await?;
        let mut rounds = 0;

        while response.requires_tool_execution() {
            if rounds >= config.max_rounds {
                warn!(rounds, "model kept requesting tools, giving up");
                return Err(BridgeError::ToolLoopExceeded { rounds });
            }
            rounds += 1;
            info!(
                round = rounds,
                calls = response.tool_calls.len(),
                "executing tool calls"
            );

            let results = execute_round(
                tool_client,
                llm.tools(),
                &response.tool_calls,
                config,
            )
            .await?;
            response = llm.invoke(&mut conversation, &results).await?;
        }

        conversation.commit();
        Ok(response.content)
    }

    /// Release the tool backend. The bridge cannot be opened again.
    pub async fn close(&mut self) -> BridgeResult<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(session) => {
                self.tool_client.close().await?;
                info!(messages = session.conversation.len(), "bridge closed");
                Ok(())
            }
            State::Idle => {
                self.state = State::Idle;
                Err(BridgeError::BridgeNotOpen)
            }
            State::Closed => Err(BridgeError::BridgeNotOpen),
        }
    }
}

/// Rolls the conversation back to where it started unless committed
struct Checkpoint<'c> {
    conversation: &'c mut Conversation,
    mark: usize,
    committed: bool,
}

impl<'c> Checkpoint<'c> {
    fn new(conversation: &'c mut Conversation) -> Self {
        let mark = conversation.len();
        Self {
            conversation,
            mark,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Deref for Checkpoint<'_> {
    type Target = Conversation;

    fn deref(&self) -> &Conversation {
        &*self.conversation
    }
}

impl DerefMut for Checkpoint<'_> {
    fn deref_mut(&mut self) -> &mut Conversation {
        &mut *self.conversation
    }
}

impl Drop for Checkpoint<'_> {
    fn drop(&mut self) {
        if !self.committed && self.conversation.len() > self.mark {
            debug!(
                dropped = self.conversation.len() - self.mark,
                "rolling back unfinished exchange"
            );
            self.conversation.truncate(self.mark);
        }
    }
}

/// Answer every call of one assistant turn, in the order they were emitted
async fn execute_round(
    tool_client: &dyn ToolClient,
    tools: &[Tool],
    calls: &[ToolCall],
    config: &BridgeConfig,
) -> BridgeResult<Vec<ToolResult>> {
    let timeout = config.tool_timeout();

    if config.parallel_tool_calls {
        let futures: Vec<_> = calls
            .iter()
            .map(|call| execute_call(tool_client, tools, call, timeout))
            .collect();
        join_all(futures).await.into_iter().collect()
    } else {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(execute_call(tool_client, tools, call, timeout).await?);
        }
        Ok(results)
    }
}

/// Run one call. Tool failures become error results; only a lost backend escapes.
async fn execute_call(
    tool_client: &dyn ToolClient,
    tools: &[Tool],
    call: &ToolCall,
    timeout: Option<Duration>,
) -> BridgeResult<ToolResult> {
    let name = match resolve_call(tools, call) {
        Ok(name) => name,
        Err(err) => {
            warn!(tool = %call.name, error = %err, "rejected tool call");
            return Ok(ToolResult::error(&call.id, &err));
        }
    };

    debug!(tool = %name, arguments = %call.arguments, "calling tool");
    let pending = tool_client.call_tool(name, call.arguments.clone());
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .unwrap_or_else(|_| {
                Err(ToolError::Unavailable(format!(
                    "{} did not finish within {:?}",
                    name, limit
                )))
            }),
        None => pending.await,
    };

    match outcome {
        Ok(output) => {
            debug!(tool = %name, blocks = output.len(), "tool call succeeded");
            Ok(ToolResult::success(&call.id, output))
        }
        Err(ToolError::Unavailable(message)) => Err(BridgeError::ToolBackendUnavailable(message)),
        Err(err) => {
            warn!(tool = %name, error = %err, "tool call failed");
            Ok(ToolResult::error(&call.id, &err))
        }
    }
}

/// Map the name the model used back to the backend's tool name and check
/// the arguments are an object
fn resolve_call<'t>(tools: &'t [Tool], call: &ToolCall) -> Result<&'t str, ToolError> {
    if !is_valid_function_name(&call.name) {
        return Err(ToolError::InvalidParameters(format!(
            "'{}' is not a valid tool name",
            call.name
        )));
    }

    let tool = tools
        .iter()
        .find(|tool| tool.name == call.name)
        .or_else(|| {
            tools
                .iter()
                .find(|tool| sanitize_function_name(&tool.name) == call.name)
        })
        .ok_or_else(|| ToolError::ToolNotFound(call.name.clone()))?;

    match &call.arguments {
        Value::Object(_) => Ok(&tool.name),
        Value::String(raw) => Err(ToolError::InvalidParameters(format!(
            "arguments are not valid JSON: {}",
            raw
        ))),
        other => Err(ToolError::InvalidParameters(format!(
            "arguments must be a JSON object, got {}",
            other
        ))),
    }
}
