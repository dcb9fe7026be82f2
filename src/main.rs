//! Waypoint server.
//!
//! Entry point for the tool-using assistant backend.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use waypoint::AppState;
use waypoint::config::AppConfig;
use waypoint::mcp::{McpConfig, RmcpTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        name: "llm.config.loaded",
        provider = %config.llm.provider,
        model = ?config.llm.model,
        base_url = ?config.llm.base_url,
        "LLM configuration loaded"
    );

    let mcp_path = Path::new(&config.mcp.config_path);
    let mcp = if mcp_path.exists() {
        McpConfig::load(mcp_path)
            .with_context(|| format!("loading tool servers from {}", mcp_path.display()))?
    } else {
        tracing::warn!(
            path = %mcp_path.display(),
            "Tool-server configuration not found; running without tools"
        );
        McpConfig::default()
    };

    info!(
        name: "mcp.config.loaded",
        servers = ?mcp.mcp_servers.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
        "Tool servers configured"
    );

    let state = AppState::new(config, mcp, Arc::new(RmcpTransport));
    waypoint::server::start_server(state).await
}
