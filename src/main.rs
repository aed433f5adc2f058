use agent_hub_lib::config::merger::{PartialModelConfig, PartialServerConfig, PartialStorageConfig};
use agent_hub_lib::config::{ConfigLoader, PartialConfig, StorageBackend};
use agent_hub_lib::server::{self, generate_auth_token, ServerAppState};
use agent_hub_lib::shutdown::{register_signal_handlers, ShutdownHandler, ShutdownState};
use agent_hub_lib::startup;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Agent Hub - hot-reloadable agents with streamed answers over HTTP/SSE
#[derive(Parser, Debug)]
#[command(name = "agent-hub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file layered over the global one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to bind the server to
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind the server to
    #[arg(long)]
    bind: Option<String>,

    /// Directory for sessions, messages and memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep sessions and messages in memory only
    #[arg(long)]
    memory: bool,

    /// Fixed auth token (or set AGENT_HUB_TOKEN)
    /// If not provided, a random token is generated on each startup
    #[arg(long, env = "AGENT_HUB_TOKEN")]
    token: Option<String>,

    /// Allowed CORS origin; repeat for several
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,

    /// Model API key (or set AGENT_HUB_API_KEY)
    #[arg(long, env = "AGENT_HUB_API_KEY")]
    api_key: Option<String>,
}

impl Cli {
    fn overrides(&self) -> PartialConfig {
        PartialConfig {
            server: Some(PartialServerConfig {
                port: self.port,
                bind: self.bind.clone(),
                cors_origins: (!self.cors_origins.is_empty()).then(|| self.cors_origins.clone()),
                token: self.token.clone(),
            }),
            storage: Some(PartialStorageConfig {
                backend: self.memory.then_some(StorageBackend::Memory),
                data_dir: self.data_dir.clone(),
                agents_dir: None,
            }),
            model: Some(PartialModelConfig {
                api_key: self.api_key.clone(),
                ..Default::default()
            }),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ConfigLoader::new()
        .load(cli.config.as_deref(), Some(cli.overrides()))
        .context("Failed to load configuration")?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    rt.block_on(async move {
        let shutdown_state = ShutdownState::new();
        if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
            log::warn!("Failed to register signal handlers: {}", e);
        }

        let port = config.server.port;
        let bind = config.server.bind.clone();
        let cors_origins = config.server.cors_origins.clone();
        let auth_token = config
            .server
            .token
            .clone()
            .unwrap_or_else(generate_auth_token);

        let services = startup::start(config, None).await?;
        let state = ServerAppState::new(auth_token, shutdown_state.clone(), &services);

        let served = server::run_server(port, &bind, state, &cors_origins).await;
        if let Err(e) = &served {
            log::error!("Server error: {}", e);
        }

        let report = ShutdownHandler::with_state(shutdown_state)
            .handle_shutdown(|| services.shutdown())
            .await;
        if !report.is_clean() {
            log::warn!("Shutdown finished with {} busy agent(s)", report.busy_agents.len());
        }

        served.map_err(anyhow::Error::msg)
    })
}
