use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::errors::{BridgeError, BridgeResult};
use crate::providers::configs::{
    AzureProviderConfig, OpenAiProviderConfig, ProviderConfig, OPENAI_DEFAULT_HOST,
};
use crate::providers::factory::ProviderType;

pub const ENV_PREFIX: &str = "MCP_BRIDGE";

/// Variables understood for Azure deployments when no prefixed setting exists
const AZURE_FALLBACKS: [(&str, &str); 4] = [
    ("AZURE_OPEN_AI_ENDPOINT", "llm.azure_endpoint"),
    ("AZURE_OPEN_AI_API_VERSION", "llm.api_version"),
    ("AZURE_OPEN_AI_API_KEY", "llm.api_key"),
    ("AZURE_OPEN_AI_DEPLOYMENT_MODEL", "llm.deployment"),
];

/// Model endpoint, credentials and generation parameters
#[derive(Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i32,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub azure_endpoint: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_version: None,
            azure_endpoint: None,
            deployment: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// api keys never reach the logs
impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_version", &self.api_version)
            .field("azure_endpoint", &self.azure_endpoint)
            .field("deployment", &self.deployment)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LlmConfig {
    /// A generic OpenAI-compatible endpoint
    pub fn openai<K: Into<String>, M: Into<String>>(api_key: K, model: M) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: Some(model.into()),
            ..Default::default()
        }
    }

    /// An Azure OpenAI deployment
    pub fn azure<K, E, V, D>(api_key: K, endpoint: E, api_version: V, deployment: D) -> Self
    where
        K: Into<String>,
        E: Into<String>,
        V: Into<String>,
        D: Into<String>,
    {
        Self {
            api_key: Some(api_key.into()),
            azure_endpoint: Some(endpoint.into()),
            api_version: Some(api_version.into()),
            deployment: Some(deployment.into()),
            ..Default::default()
        }
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// The presence of an Azure endpoint selects the Azure dialect
    pub fn dialect(&self) -> ProviderType {
        match present(&self.azure_endpoint) {
            Some(_) => ProviderType::Azure,
            None => ProviderType::OpenAi,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the settings and resolve them into a provider configuration
    pub fn provider_config(&self) -> BridgeResult<ProviderConfig> {
        let api_key = required(&self.api_key, "llm.api_key")?;

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(BridgeError::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.max_tokens <= 0 {
            return Err(BridgeError::Config(format!(
                "max_tokens must be positive, got {}",
                self.max_tokens
            )));
        }

        match self.dialect() {
            ProviderType::Azure => {
                let endpoint = required(&self.azure_endpoint, "llm.azure_endpoint")?;
                check_url(endpoint, "llm.azure_endpoint")?;
                Ok(ProviderConfig::Azure(AzureProviderConfig {
                    endpoint: endpoint.to_string(),
                    api_key: api_key.to_string(),
                    api_version: required(&self.api_version, "llm.api_version")?.to_string(),
                    deployment: required(&self.deployment, "llm.deployment")?.to_string(),
                    temperature: Some(self.temperature),
                    max_tokens: Some(self.max_tokens),
                    timeout: self.timeout(),
                }))
            }
            ProviderType::OpenAi => {
                let host = present(&self.base_url).unwrap_or(OPENAI_DEFAULT_HOST);
                check_url(host, "llm.base_url")?;
                Ok(ProviderConfig::OpenAi(OpenAiProviderConfig {
                    host: host.to_string(),
                    api_key: api_key.to_string(),
                    model: required(&self.model, "llm.model")?.to_string(),
                    temperature: Some(self.temperature),
                    max_tokens: Some(self.max_tokens),
                    timeout: self.timeout(),
                }))
            }
        }
    }
}

/// How to reach the tool backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase", tag = "transport")]
pub enum ToolBackendConfig {
    /// An MCP server spawned as a child process, spoken to over stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
}

impl ToolBackendConfig {
    pub fn stdio<S: Into<String>>(command: S, args: Vec<String>) -> Self {
        ToolBackendConfig::Stdio {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
        }
    }
}

/// Everything a bridge session needs, owned by the caller
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: Option<f64>,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    #[serde(default)]
    pub backend: Option<ToolBackendConfig>,
}

impl BridgeConfig {
    pub fn new(llm: LlmConfig) -> Self {
        Self {
            llm,
            system_prompt: None,
            max_rounds: default_max_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
            parallel_tool_calls: false,
            backend: None,
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout_secs = timeout.map(|t| t.as_secs_f64());
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    pub fn with_backend(mut self, backend: ToolBackendConfig) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Check every required field, so a bad configuration fails at open
    pub fn validate(&self) -> BridgeResult<ProviderConfig> {
        if self.max_rounds == 0 {
            return Err(BridgeError::Config("max_rounds must be at least 1".into()));
        }
        if let Some(secs) = self.tool_timeout_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(BridgeError::Config(format!(
                    "tool_timeout_secs must be a non-negative number, got {}",
                    secs
                )));
            }
        }
        if let Some(ToolBackendConfig::Stdio { command, .. }) = &self.backend {
            if command.trim().is_empty() {
                return Err(BridgeError::Config("backend.command must not be empty".into()));
            }
        }
        self.llm.provider_config()
    }

    /// Load from an optional TOML file, then `MCP_BRIDGE__*` variables.
    ///
    /// Nested keys use `__`, e.g. `MCP_BRIDGE__LLM__API_KEY`. The Azure
    /// variables (`AZURE_OPEN_AI_*`) fill in whatever is not set otherwise.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let mut builder = Config::builder()
            .set_default("max_rounds", default_max_rounds() as i64)?
            .set_default("llm.temperature", default_temperature())?
            .set_default("llm.max_tokens", default_max_tokens() as i64)?;

        for (var, key) in AZURE_FALLBACKS {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_default(key, value)?;
            }
        }

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("backend.args"),
            )
            .build()?;

        config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            BridgeError::Config(err.to_string())
        })
    }
}

/// Environment variable name for a dotted configuration key
pub fn to_env_var(key: &str) -> String {
    format!("{}__{}", ENV_PREFIX, key.replace('.', "__").to_uppercase())
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, key: &str) -> BridgeResult<&'a str> {
    present(value).ok_or_else(|| {
        BridgeError::Config(format!("missing {} (set {})", key, to_env_var(key)))
    })
}

fn check_url(value: &str, key: &str) -> BridgeResult<()> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| BridgeError::Config(format!("invalid {} '{}': {}", key, value, e)))
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> i32 {
    2000
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_max_rounds() -> usize {
    10
}

fn default_tool_timeout_secs() -> Option<f64> {
    Some(60.0)
}
