use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

mod app;
mod collaborators;
mod error;
mod http;
mod mcp_bridge;
mod orchestrator;
mod ws;

/// Self-hosted voice/chat assistant orchestration engine.
#[derive(Parser, Debug)]
#[command(name = "renfield-gateway")]
struct Cli {
    /// Path to the TOML config file. Defaults to `~/.renfield/renfield.toml`
    /// (or the `RENFIELD_CONFIG` env var if set).
    #[arg(long, global = true)]
    config: Option<String>,
    /// Override `gateway.bind`.
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Override `gateway.port`.
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Override `mcp.config_path`.
    #[arg(long = "mcp-config", global = true)]
    mcp_config: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway HTTP/WS server (default when no subcommand is given).
    Serve,
    /// Run a JSON-RPC stdio loop exposing Tool Registry introspection, for
    /// operator scripts that don't want to hit the HTTP API.
    McpBridge,
}

fn load_config(cli: &Cli) -> renfield_core::config::RenfieldConfig {
    let config_path = cli.config.clone().or_else(|| std::env::var("RENFIELD_CONFIG").ok());
    let mut config = renfield_core::config::RenfieldConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config load failed, using defaults");
        renfield_core::config::RenfieldConfig::default()
    });
    if let Some(bind) = &cli.bind {
        config.gateway.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(mcp_config) = &cli.mcp_config {
        config.mcp.config_path = mcp_config.clone();
    }
    config
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "renfield_gateway=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::McpBridge) => {
            let config = load_config(&cli);
            mcp_bridge::run(&config)
        }
        Some(Command::Serve) | None => {
            let config = load_config(&cli);
            tokio::runtime::Runtime::new()?.block_on(serve(config))
        }
    }
}

async fn serve(config: renfield_core::config::RenfieldConfig) -> anyhow::Result<()> {
    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = app::AppState::new(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = state.spawn_background_tasks(shutdown_rx);

    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "renfield gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in background {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
