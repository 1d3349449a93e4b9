//! Line-based chat server
//!
//! ## Task layout
//!
//! - **Coordinator** (one per process): owns the membership set, applies
//!   join/leave events and fans broadcasts out to every member but the sender
//! - **Connection handler** (one per connection): reads lines, emits events
//! - **Outbound writer** (one per connection): drains the session's bounded
//!   queue onto the socket
//!
//! A recipient whose queue stays full for longer than the configured send
//! timeout is evicted, so one stalled reader cannot hold up everyone else.

pub mod chat_server;
pub mod connection_handler;
pub mod coordinator;
pub mod writer;

pub use chat_server::ChatServer;
pub use connection_handler::ConnectionHandler;
pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorStats};
pub use writer::OutboundWriter;
