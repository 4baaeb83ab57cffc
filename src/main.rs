//! Gateway node - main entry point
//!
//! Loads the configuration, starts the orchestrator and runs until SIGINT or
//! SIGTERM, then shuts down gracefully (status `offline` before the session
//! closes).

use clap::{Parser, Subcommand};
use gateway_node::config::GatewayConfig;
use gateway_node::gateway::{Orchestrator, StartupMode};
use gateway_node::observability::{init_default_logging, init_logging, LogFormat};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Connectivity and control engine for a sensor/actuator gateway node
#[derive(Parser)]
#[command(name = "gateway-node")]
#[command(about = "MQTT gateway node with illumination and thermal control")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["gateway.toml", "config/gateway.toml"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        verbosity => {
            let level = if verbosity == 1 { Level::DEBUG } else { Level::TRACE };
            let format = std::env::var("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(LogFormat::Compact);
            init_logging(level, format, false);
        }
    }

    info!("Starting gateway-node v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_gateway(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(GatewayConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(GatewayConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create gateway.toml".into())
}

async fn run_gateway(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(device = %config.device.id, broker = %config.mqtt.broker_url, "Gateway starting");

    let mut gateway = Orchestrator::with_host_defaults(config);
    match gateway.start().await? {
        StartupMode::Connected => info!("Gateway running, broker session up"),
        StartupMode::Degraded => warn!("Gateway running without broker session, retrying in background"),
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    if let Err(e) = gateway.shutdown().await {
        error!("Error during shutdown: {}", e);
        return Err(e.into());
    }
    Ok(())
}

fn handle_config_command(
    config: &GatewayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
