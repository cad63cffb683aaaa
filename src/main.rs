//! WsBridge - WebSocket Connection Client
//!
//! Interactive WebSocket client built on the connection registry: forwards
//! stdin lines as text frames and prints delivered events until the
//! connection closes.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsbridge::{
    config::ConfigManager, Config, ConnectionEventKind, ConnectionRegistry, Payload,
};

/// CLI arguments for WsBridge
#[derive(Parser, Debug)]
#[command(name = "wsbridge")]
#[command(about = "WsBridge - WebSocket connection client")]
#[command(version)]
#[command(long_about = "
WsBridge - WebSocket connection client

Connects to a WebSocket endpoint, forwards stdin lines as text frames, and
prints received frames to stdout until the connection closes.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  WSBRIDGE_MAX_MESSAGE_SIZE - Maximum inbound message size in bytes
  WSBRIDGE_MAX_FRAME_SIZE   - Maximum inbound frame size in bytes
  WSBRIDGE_EVENT_CAPACITY   - Event channel capacity
  WSBRIDGE_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// WebSocket URL to connect to (e.g. ws://127.0.0.1:9001)
    pub url: Option<String>,

    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "wsbridge.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum inbound message size in bytes (overrides config file)
    #[arg(long, help = "Maximum inbound message size in bytes")]
    pub max_message_size: Option<usize>,

    /// Event channel capacity (overrides config file)
    #[arg(long, help = "Event channel capacity")]
    pub event_capacity: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!("Starting WsBridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(args.max_message_size, args.event_capacity);

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!(
            "  Max message size: {} bytes",
            config.transport.max_message_size
        );
        info!("  Max frame size: {} bytes", config.transport.max_frame_size);
        info!("  Event capacity: {}", config.events.channel_capacity);
        info!("  Log level: {}", config.monitoring.log_level);
        return Ok(());
    }

    let Some(url) = args.url else {
        anyhow::bail!("a WebSocket URL is required (e.g. ws://127.0.0.1:9001)");
    };

    run_client(Arc::new(config), url).await
}

/// Connect, relay stdin to the connection, and print events until it closes
async fn run_client(config: Arc<Config>, url: String) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel(config.events.channel_capacity);
    let registry = ConnectionRegistry::new(Arc::clone(&config), events_tx);

    let handle = registry.create_handle(&url).await;
    registry.listen(&handle).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => match event.kind {
                    ConnectionEventKind::Data(Payload::Text(text)) => {
                        println!("{}", text);
                    }
                    ConnectionEventKind::Data(Payload::Binary(data)) => {
                        println!("<{} binary bytes>", data.len());
                    }
                    ConnectionEventKind::Closed { code, reason } => {
                        if reason.is_empty() {
                            info!("Connection closed with code {}", code);
                        } else {
                            info!("Connection closed with code {}: {}", code, reason);
                        }
                        break;
                    }
                },
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if registry.send(&handle, Payload::Text(line)).await.is_err() {
                        warn!("Connection is closed, dropping input");
                        break;
                    }
                }
                None => {
                    stdin_open = false;
                    registry.close(&handle).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, closing connection");
                registry.close(&handle).await;
            }
        }
    }

    let stats = registry.stats().await;
    debug!(
        "Final registry state: {} handles, {} active, {} closed",
        stats.handles, stats.active_sockets, stats.closed
    );

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
