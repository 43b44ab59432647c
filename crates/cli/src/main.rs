//! flowdbg CLI - Main Entry Point

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use flowdbg_cli::commands::{debug, flows, sessions};
use flowdbg_cli::output::{self, OutputFormat};
use flowdbg_cli::{ClientConfig, EngineClient};

/// flowdbg - step debugger for remote business flows
#[derive(Parser)]
#[command(name = "flowdbg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Engine base URL (overrides the config file)
    #[arg(long, env = "FLOWDBG_SERVER", global = true)]
    server: Option<String>,

    /// Config file (default: ~/.flowdbg/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse flows
    #[command(subcommand)]
    Flows(flows::FlowCommands),

    /// Inspect sessions
    #[command(subcommand)]
    Session(sessions::SessionCommands),

    /// Run a flow under the debugger
    Debug(debug::DebugArgs),

    /// Check engine status
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout belongs to the debugger display
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(flowdbg_common::default_config_path);
    let config = ClientConfig::load(&config_path)?.with_server(cli.server.clone());
    let client = EngineClient::new(&config.server_url)?;

    match cli.command {
        Commands::Flows(cmd) => flows::execute(cmd, client, cli.format).await?,
        Commands::Session(cmd) => sessions::execute(cmd, client, cli.format).await?,
        Commands::Debug(args) => debug::execute(args, client, &config).await?,
        Commands::Status => match client.service_info().await {
            Ok(info) => {
                output::print_success(&format!(
                    "{} is running at {} ({} flows, {} sessions)",
                    info.service,
                    config.server_url,
                    info.flows.len(),
                    info.active_sessions
                ));
            }
            Err(e) => {
                output::print_error(&format!(
                    "Engine is not responding at {}: {}",
                    config.server_url, e
                ));
                std::process::exit(1);
            }
        },
        Commands::Version => {
            println!("flowdbg v{}", flowdbg_common::VERSION);
        }
    }

    Ok(())
}
