use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_MAX_STEPS: usize = 15;
pub const DEFAULT_ANALYSIS_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_ANALYSIS_MAX_STEPS: usize = 2;
pub const DEFAULT_GENERATION_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_GENERATION_MAX_STEPS: usize = 5;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "SERVER_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Default provider (openai, google, ollama, generic)
    #[arg(long, env = "LLM_PROVIDER")]
    pub llm_provider: Option<String>,

    /// Default model
    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Base URL of the chat completions endpoint, version segment included
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// API key for the default provider
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Tool-server configuration file
    #[arg(long, env = "MCP_CONFIG_PATH")]
    pub mcp_config: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub mcp: McpSettings,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Default model backend. A request may name another provider.
#[derive(Deserialize, Clone, Default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpSettings {
    pub config_path: String,
}

/// Sampling temperatures and step ceilings for each invocation.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Non-streaming invocation.
    pub temperature: f32,
    pub max_steps: usize,
    /// Streaming phase 1 (tool analysis).
    pub analysis_temperature: f32,
    pub analysis_max_steps: usize,
    /// Streaming phase 2 (generation).
    pub generation_temperature: f32,
    pub generation_max_steps: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_steps: DEFAULT_MAX_STEPS,
            analysis_temperature: DEFAULT_ANALYSIS_TEMPERATURE,
            analysis_max_steps: DEFAULT_ANALYSIS_MAX_STEPS,
            generation_temperature: DEFAULT_GENERATION_TEMPERATURE,
            generation_max_steps: DEFAULT_GENERATION_MAX_STEPS,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("llm.provider", "google")?
            .set_default("mcp.config_path", "mcp-config.json")?
            .set_default("pipeline.temperature", f64::from(DEFAULT_TEMPERATURE))?
            .set_default("pipeline.max_steps", DEFAULT_MAX_STEPS as u64)?
            .set_default(
                "pipeline.analysis_temperature",
                f64::from(DEFAULT_ANALYSIS_TEMPERATURE),
            )?
            .set_default("pipeline.analysis_max_steps", DEFAULT_ANALYSIS_MAX_STEPS as u64)?
            .set_default(
                "pipeline.generation_temperature",
                f64::from(DEFAULT_GENERATION_TEMPERATURE),
            )?
            .set_default(
                "pipeline.generation_max_steps",
                DEFAULT_GENERATION_MAX_STEPS as u64,
            )?;

        // 2. Config file: explicit path, or ./waypoint.{yaml,toml,json} if present
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("waypoint").required(false)),
        };

        // 3. Environment, e.g. WAYPOINT_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("WAYPOINT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (and their env fallbacks)
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", u64::from(port))?;
        }
        if let Some(provider) = cli.llm_provider {
            builder = builder.set_override("llm.provider", provider)?;
        }
        if let Some(model) = cli.llm_model {
            builder = builder.set_override("llm.model", model)?;
        }
        if let Some(url) = cli.llm_base_url {
            builder = builder.set_override("llm.base_url", url)?;
        }
        if let Some(key) = cli.llm_api_key.filter(|k| !k.trim().is_empty()) {
            builder = builder.set_override("llm.api_key", key)?;
        }
        if let Some(path) = cli.mcp_config {
            builder = builder.set_override("mcp.config_path", path)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}
