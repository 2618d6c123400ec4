use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::client::ToolClient;
use crate::errors::{BridgeError, BridgeResult, ToolError};
use crate::models::content::Content;
use crate::models::tool::Tool;

/// A tool backend with canned results that records every call
#[derive(Clone)]
pub struct MockToolClient {
    tools: Vec<Tool>,
    responses: Arc<Mutex<HashMap<String, Result<Vec<Content>, ToolError>>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    connected: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    fail_listing: bool,
    delay: Option<Duration>,
}

impl MockToolClient {
    /// A backend exposing one tool per name, each accepting any object
    pub fn new(names: &[&str]) -> Self {
        Self {
            tools: names
                .iter()
                .map(|name| Tool::new(*name, format!("The {} tool", name), json!({"type": "object"})))
                .collect(),
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_listing: false,
            delay: None,
        }
    }

    /// Answer calls to `name` with `text`
    pub fn with_text(self, name: &str, text: &str) -> Self {
        self.with_response(name, Ok(vec![Content::text(text)]))
    }

    pub fn with_response(self, name: &str, response: Result<Vec<Content>, ToolError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(name.to_string(), response);
        self
    }

    /// Make `list_tools` fail as if the backend went away after connecting
    pub fn with_failing_list(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(name, arguments)` of every call, in the order they started
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolClient for MockToolClient {
    async fn connect(&mut self) -> BridgeResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> BridgeResult<Vec<Tool>> {
        if self.fail_listing {
            return Err(BridgeError::ToolBackendUnavailable("listing failed".into()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<Content>, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(name).cloned();
        response.unwrap_or_else(|| Ok(vec![Content::text(format!("{} done", name))]))
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
