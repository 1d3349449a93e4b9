//! TCP listener that hands each accepted connection to its own handler

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::ChatConfig;
use crate::error::{ChatError, Result};
use crate::server::connection_handler::ConnectionHandler;
use crate::server::coordinator::{CoordinatorHandle, CoordinatorStats};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Line-based TCP chat server
pub struct ChatServer {
    config: ChatConfig,
    coordinator: CoordinatorHandle,
}

impl ChatServer {
    /// Create a server that feeds the given coordinator
    pub fn new(config: ChatConfig, coordinator: CoordinatorHandle) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            ChatError::network(format!(
                "Failed to bind {}: {}",
                self.config.bind_addr, e
            ))
        })?;
        info!("Chat server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections forever. Accept errors are logged and the loop
    /// carries on.
    pub async fn run(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.spawn_connection(stream, addr),
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        debug!("Accepted connection from {}", addr);
        let handler = ConnectionHandler::new(addr, self.coordinator.clone(), &self.config);

        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            if let Err(e) = handler.run(reader, writer).await {
                error!("Connection handling failed for {}: {}", addr, e);
            }
        });
    }

    /// Get coordinator statistics
    pub async fn get_stats(&self) -> Result<CoordinatorStats> {
        self.coordinator.stats().await
    }
}
