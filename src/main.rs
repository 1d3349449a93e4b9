//! Line-based TCP chat server
//!
//! Usage:
//!   cargo run -- server                       # Listen on 0.0.0.0:2020
//!   cargo run -- server --bind 127.0.0.1:5000 # Listen elsewhere
//!   RUST_LOG=debug cargo run -- server        # Verbose logging

use std::net::SocketAddr;
use std::time::Duration;

use chatroom::{ChatConfig, ChatServer, Coordinator};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chatroom",
    version,
    about = "Line-based multi-client TCP chat server"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the chat server
    Server(ServerArgs),
}

#[derive(Args)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:2020")]
    bind: SocketAddr,
    /// Messages buffered per client before the send timeout applies
    #[arg(long, default_value_t = 8)]
    outbound_capacity: usize,
    /// Capacity of each coordinator event channel
    #[arg(long, default_value_t = 8)]
    event_capacity: usize,
    /// How long a full client queue may block fanout before that client is
    /// disconnected
    #[arg(long, default_value_t = 500)]
    send_timeout_ms: u64,
    /// Longest accepted input line in bytes
    #[arg(long, default_value_t = 8 * 1024)]
    max_line_length: usize,
}

impl From<ServerArgs> for ChatConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            bind_addr: args.bind,
            outbound_capacity: args.outbound_capacity,
            event_capacity: args.event_capacity,
            send_timeout: Duration::from_millis(args.send_timeout_ms),
            max_line_length: args.max_line_length,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args.into()).await,
    }
}

async fn run_server(config: ChatConfig) -> anyhow::Result<()> {
    config.validate()?;

    info!("Starting chat server...");
    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Outbound queue capacity: {}", config.outbound_capacity);
    info!("  - Event channel capacity: {}", config.event_capacity);
    info!("  - Send timeout: {:?}", config.send_timeout);
    info!("  - Max line length: {} bytes", config.max_line_length);

    let (coordinator, _coordinator_task) = Coordinator::spawn(&config);
    let server = ChatServer::new(config, coordinator);
    let listener = server.bind().await?;

    tokio::select! {
        _ = server.run(listener) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl-C, shutting down");
        }
    }

    if let Ok(stats) = server.get_stats().await {
        info!(
            "Final stats: {} members, {} messages delivered, {} evictions",
            stats.members, stats.delivered, stats.evictions
        );
    }

    Ok(())
}
