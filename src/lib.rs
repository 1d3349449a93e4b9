//! Line-based TCP chat server with a single coordinating broadcaster
//!
//! Every accepted connection gets a reader task (the connection handler) and a
//! writer task draining a private bounded queue. One coordinator task owns the
//! membership set and performs all fanout, so no locks guard shared state.

pub mod error;
pub mod message;
pub mod server;
pub mod session;

pub use error::{ChatError, Result};
pub use message::ChatMessage;
pub use server::{ChatServer, Coordinator, CoordinatorHandle, CoordinatorStats};
pub use session::{Session, SessionId};

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Chat server configuration
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Server listen address
    pub bind_addr: SocketAddr,
    /// Capacity of each session's outbound queue
    pub outbound_capacity: usize,
    /// Capacity of each coordinator event channel
    pub event_capacity: usize,
    /// How long the coordinator waits on a full outbound queue before
    /// evicting that recipient
    pub send_timeout: Duration,
    /// Maximum inbound line length in bytes
    pub max_line_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2020)),
            outbound_capacity: 8,
            event_capacity: 8,
            send_timeout: Duration::from_millis(500),
            max_line_length: 8 * 1024,
        }
    }
}

impl ChatConfig {
    /// Reject settings the channels and codec cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.outbound_capacity == 0 {
            return Err(ChatError::config("outbound capacity must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(ChatError::config("event capacity must be at least 1"));
        }
        if self.max_line_length == 0 {
            return Err(ChatError::config("max line length must be at least 1"));
        }
        Ok(())
    }
}
