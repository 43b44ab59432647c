//! flowdbg Engine
//!
//! Reference flow debug engine for the flowdbg client.

use clap::Parser;
use flowdbg_server::{app_state, serve, ServerConfig};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "flowdbgd")]
#[command(about = "flowdbg engine - serves flows and debug sessions")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "flowdbgd.toml")]
    config: PathBuf,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Flow definitions file
    #[arg(short, long)]
    flows: Option<PathBuf>,

    /// Simulated work per step in milliseconds
    #[arg(long)]
    step_delay_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("flowdbg engine v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(flows) = cli.flows {
        config.flows_path = Some(flows);
    }
    if let Some(delay) = cli.step_delay_ms {
        config.step_delay_ms = delay;
    }

    let state = app_state(&config)?;
    let listener = TcpListener::bind(&config.listen).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = serve(listener, state) => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
    }

    info!("Engine shutdown complete");
    Ok(())
}
