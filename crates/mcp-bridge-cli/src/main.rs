use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use mcp_bridge::{Bridge, BridgeConfig, ToolBackendConfig};

mod session;

use session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; MCP_BRIDGE__* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// System prompt placed at the start of the conversation
    #[arg(long)]
    system_prompt: Option<String>,

    /// Maximum tool rounds for a single message
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Run the tool calls of one round concurrently
    #[arg(long)]
    parallel: bool,

    /// MCP server command and its arguments, after `--`
    #[arg(last = true)]
    server: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    tracing::debug!(?config, "configuration loaded");
    let bridge = Bridge::from_config(&config)
        .context("An MCP server must be given after `--` or configured as [backend]")?;

    Session::new(bridge).start().await
}

fn build_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;

    if let Some(prompt) = &cli.system_prompt {
        config.system_prompt = Some(prompt.clone());
    }
    if let Some(max_rounds) = cli.max_rounds {
        config.max_rounds = max_rounds;
    }
    if cli.parallel {
        config.parallel_tool_calls = true;
    }
    if let Some((command, args)) = cli.server.split_first() {
        config.backend = Some(ToolBackendConfig::stdio(command.clone(), args.to_vec()));
    }
    Ok(config)
}
