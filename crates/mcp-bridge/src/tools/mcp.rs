use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::ToolClient;
use crate::config::ToolBackendConfig;
use crate::errors::{BridgeError, BridgeResult, ToolError};
use crate::models::content::Content;
use crate::models::role::Role;
use crate::models::tool::Tool;

const PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const INVALID_PARAMS: i64 = -32602;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Responder = oneshot::Sender<Result<Value, RpcError>>;

/// Requests awaiting a response, keyed by id. `None` once the server is gone.
///
/// Only ever locked briefly and never across an await.
type PendingMap = Arc<std::sync::Mutex<Option<HashMap<u64, Responder>>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, Option<HashMap<u64, Responder>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unregisters a request once its caller stops waiting, including when the
/// waiting future is dropped mid-flight.
struct PendingRequest<'p> {
    pending: &'p PendingMap,
    id: u64,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if let Some(map) = lock_pending(self.pending).as_mut() {
            map.remove(&self.id);
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<Tool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug)]
enum CallFailure {
    Transport(String),
    Rpc(RpcError),
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Transport(message) => write!(f, "{}", message),
            CallFailure::Rpc(err) => write!(f, "JSON-RPC error {}: {}", err.code, err.message),
        }
    }
}

enum Launch {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    },
    // behind a mutex so the client stays shareable while the streams are unused
    Streams(std::sync::Mutex<Option<(BoxedReader, BoxedWriter)>>),
}

struct Session {
    writer: Mutex<BoxedWriter>,
    next_id: AtomicU64,
    pending: PendingMap,
    reader: JoinHandle<()>,
    child: Option<Child>,
}

impl Session {
    async fn send_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

/// Client for a Model Context Protocol server speaking newline-delimited
/// JSON-RPC 2.0.
///
/// One session is held for the client's lifetime. Requests may be issued
/// concurrently; responses are matched back to callers by request id.
pub struct McpClient {
    name: String,
    launch: Launch,
    session: Option<Session>,
    known_tools: std::sync::Mutex<HashSet<String>>,
    request_timeout: Duration,
}

impl McpClient {
    /// A server spawned as a child process, spoken to over its stdin/stdout
    pub fn stdio<S: Into<String>>(
        command: S,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    ) -> Self {
        let command = command.into();
        Self::with_launch(
            command.clone(),
            Launch::Stdio {
                command,
                args,
                env,
                cwd,
            },
        )
    }

    pub fn from_config(config: &ToolBackendConfig) -> Self {
        match config {
            ToolBackendConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => Self::stdio(command.clone(), args.clone(), env.clone(), cwd.clone()),
        }
    }

    /// A server reachable through an already established byte stream
    pub fn from_streams<N, R, W>(name: N, reader: R, writer: W) -> Self
    where
        N: Into<String>,
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_launch(
            name.into(),
            Launch::Streams(std::sync::Mutex::new(Some((Box::new(reader), Box::new(writer))))),
        )
    }

    fn with_launch(name: String, launch: Launch) -> Self {
        Self {
            name,
            launch,
            session: None,
            known_tools: std::sync::Mutex::new(HashSet::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// How long to wait for any single response before giving up on the server
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn open_transport(&mut self) -> BridgeResult<(BoxedReader, BoxedWriter, Option<Child>)> {
        match &mut self.launch {
            Launch::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(command.as_str());
                cmd.args(args.iter())
                    .envs(env.iter())
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }

                let mut child = cmd.spawn().map_err(|e| {
                    BridgeError::ToolBackendUnavailable(format!(
                        "failed to spawn '{}': {}",
                        command, e
                    ))
                })?;
                let stdin = child.stdin.take().ok_or_else(|| {
                    BridgeError::ToolBackendUnavailable(format!("{}: no stdin", command))
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    BridgeError::ToolBackendUnavailable(format!("{}: no stdout", command))
                })?;
                Ok((Box::new(stdout), Box::new(stdin), Some(child)))
            }
            Launch::Streams(streams) => {
                let streams = streams.get_mut().unwrap_or_else(PoisonError::into_inner);
                let (reader, writer) = streams.take().ok_or_else(|| {
                    BridgeError::ToolBackendUnavailable(format!(
                        "{}: transport was already used",
                        self.name
                    ))
                })?;
                Ok((reader, writer, None))
            }
        }
    }

    /// Send a request and wait for its response
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, CallFailure> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| CallFailure::Transport("not connected".to_string()))?;

        let id = session.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })
        .map_err(|e| CallFailure::Transport(format!("serialize error: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        let registered = match lock_pending(&session.pending).as_mut() {
            Some(pending) => {
                pending.insert(id, tx);
                true
            }
            None => false,
        };
        if !registered {
            return Err(CallFailure::Transport("server closed the connection".into()));
        }
        let _registration = PendingRequest {
            pending: &session.pending,
            id,
        };

        debug!(server = %self.name, id, method, "mcp request");
        session
            .send_line(&line)
            .await
            .map_err(|e| CallFailure::Transport(format!("write error: {}", e)))?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(CallFailure::Rpc),
            Ok(Err(_)) => Err(CallFailure::Transport("server closed the connection".into())),
            Err(_) => Err(CallFailure::Transport(format!(
                "no response to {} within {:?}",
                method, self.request_timeout
            ))),
        }
    }

    async fn notify(&self, method: &str) -> Result<(), CallFailure> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| CallFailure::Transport("not connected".to_string()))?;
        let line = json!({"jsonrpc": "2.0", "method": method}).to_string();
        session
            .send_line(&line)
            .await
            .map_err(|e| CallFailure::Transport(format!("write error: {}", e)))
    }

    async fn initialize(&self) -> BridgeResult<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcp-bridge",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| self.unavailable("initialize", e))?;
        let protocol = result
            .get("protocolVersion")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        info!(server = %self.name, protocol, "mcp session initialized");

        self.notify("notifications/initialized")
            .await
            .map_err(|e| self.unavailable("notifications/initialized", e))
    }

    async fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let Session {
            writer,
            pending,
            reader,
            child,
            ..
        } = session;

        // closing stdin asks a well-behaved server to exit
        drop(writer);
        if let Some(mut child) = child {
            if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
                if let Err(e) = child.kill().await {
                    warn!(server = %self.name, "failed to kill mcp server: {}", e);
                }
            }
        }
        reader.abort();
        lock_pending(&pending).take();
        info!(server = %self.name, "mcp session closed");
    }

    fn unavailable(&self, method: &str, failure: CallFailure) -> BridgeError {
        BridgeError::ToolBackendUnavailable(format!("{}: {} failed: {}", self.name, method, failure))
    }
}

#[async_trait]
impl ToolClient for McpClient {
    async fn connect(&mut self) -> BridgeResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (reader, writer, child) = self.open_transport()?;
        let pending: PendingMap = Arc::new(std::sync::Mutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(read_responses(reader, pending.clone(), self.name.clone()));
        self.session = Some(Session {
            writer: Mutex::new(writer),
            next_id: AtomicU64::new(1),
            pending,
            reader,
            child,
        });

        if let Err(err) = self.initialize().await {
            self.shutdown().await;
            return Err(err);
        }
        Ok(())
    }

    async fn list_tools(&self) -> BridgeResult<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({"cursor": c}));
            let result = self
                .request("tools/list", params)
                .await
                .map_err(|e| self.unavailable("tools/list", e))?;
            let page: ToolsPage = serde_json::from_value(result).map_err(|e| {
                BridgeError::ToolBackendUnavailable(format!(
                    "{}: invalid tools/list result: {}",
                    self.name, e
                ))
            })?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name, count = tools.len(), "mcp tools loaded");
        if let Ok(mut known) = self.known_tools.lock() {
            *known = tools.iter().map(|tool| tool.name.clone()).collect();
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<Content>, ToolError> {
        if self.session.is_none() {
            return Err(ToolError::Unavailable(format!("{}: not connected", self.name)));
        }
        if let Ok(known) = self.known_tools.lock() {
            if !known.is_empty() && !known.contains(name) {
                return Err(ToolError::ToolNotFound(name.to_string()));
            }
        }

        let params = json!({"name": name, "arguments": arguments});
        let result = self
            .request("tools/call", Some(params))
            .await
            .map_err(|failure| match failure {
                CallFailure::Transport(message) => {
                    ToolError::Unavailable(format!("{}: {}", self.name, message))
                }
                CallFailure::Rpc(err) => rpc_error_to_tool_error(name, err),
            })?;

        let content = decode_call_result(&result);
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            let message = content
                .iter()
                .filter_map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ToolError::ExecutionError(if message.is_empty() {
                format!("{} reported an error", name)
            } else {
                message
            }));
        }
        Ok(content)
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.shutdown().await;
        Ok(())
    }
}

/// Dispatch incoming responses to waiting callers until the server goes away
async fn read_responses(reader: BoxedReader, pending: PendingMap, server: String) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => dispatch(&line, &pending, &server),
            Ok(None) => {
                info!(server = %server, "mcp server closed its output");
                break;
            }
            Err(e) => {
                error!(server = %server, "mcp read error: {}", e);
                break;
            }
        }
    }

    // dropping the senders fails every request still waiting
    lock_pending(&pending).take();
}

fn dispatch(line: &str, pending: &PendingMap, server: &str) {
    let message: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(server = %server, "unparsable mcp message: {}", e);
            return;
        }
    };

    if let Some(method) = &message.method {
        debug!(server = %server, method = %method, "ignoring server-initiated message");
        return;
    }
    let Some(id) = message.id.as_ref().and_then(Value::as_u64) else {
        return;
    };

    let sender = lock_pending(pending).as_mut().and_then(|map| map.remove(&id));
    if let Some(tx) = sender {
        let outcome = match message.error {
            Some(err) => Err(err),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        // the caller may have timed out already
        let _ = tx.send(outcome);
    }
}

fn rpc_error_to_tool_error(name: &str, err: RpcError) -> ToolError {
    let message = err.message.to_lowercase();
    if message.contains("unknown tool") || message.contains("not found") {
        ToolError::ToolNotFound(name.to_string())
    } else if err.code == INVALID_PARAMS {
        ToolError::InvalidParameters(err.message)
    } else {
        ToolError::ExecutionError(err.message)
    }
}

fn decode_call_result(result: &Value) -> Vec<Content> {
    let mut content: Vec<Content> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().filter_map(decode_block).collect())
        .unwrap_or_default();

    if content.is_empty() {
        if let Some(structured) = result.get("structuredContent") {
            content.push(Content::text(structured.to_string()));
        }
    }
    content
}

fn decode_block(block: &Value) -> Option<Content> {
    let content = match block.get("type").and_then(Value::as_str)? {
        "text" => Content::text(block.get("text")?.as_str()?),
        "image" => Content::image(
            block.get("data")?.as_str()?,
            block.get("mimeType")?.as_str()?,
        ),
        "resource" => Content::text(block.get("resource")?.get("text")?.as_str()?),
        other => {
            debug!(kind = other, "skipping unsupported content block");
            return None;
        }
    };
    Some(annotate(content, block.get("annotations")))
}

fn annotate(mut content: Content, annotations: Option<&Value>) -> Content {
    let Some(annotations) = annotations else {
        return content;
    };
    if let Some(audience) = annotations.get("audience").and_then(Value::as_array) {
        let roles = audience
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|role| role.parse::<Role>().ok())
            .collect();
        content = content.with_audience(roles);
    }
    if let Some(priority) = annotations.get("priority").and_then(Value::as_f64) {
        content = content.with_priority(priority as f32);
    }
    content
}
