//! Per-connection session identity and outbound queue

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::current_timestamp;
use crate::message::ChatMessage;

/// Opaque, globally unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identity of one connected client.
///
/// Immutable once created. The handler and the coordinator share it through
/// an `Arc`; only the coordinator ever fires `evicted`.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    addr: SocketAddr,
    connected_at: u64,
    evicted: CancellationToken,
}

impl Session {
    /// Create a new session for a peer
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_id(SessionId::generate(), addr)
    }

    /// Create a session with a caller-chosen identifier
    pub fn with_id(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            connected_at: current_timestamp(),
            evicted: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Milliseconds since UNIX epoch when the connection was accepted
    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    /// Resolves once the coordinator has evicted this session
    pub async fn evicted(&self) {
        self.evicted.cancelled().await
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    pub(crate) fn evict(&self) {
        self.evicted.cancel();
    }
}

/// Producer half of a session's outbound queue.
///
/// Deliberately not `Clone`: after the join event hands it to the coordinator
/// there is exactly one producer, and dropping it closes the queue.
#[derive(Debug)]
pub struct Outbound {
    tx: mpsc::Sender<ChatMessage>,
}

/// Consumer half of a session's outbound queue, drained by the writer
pub type OutboundReceiver = mpsc::Receiver<ChatMessage>;

/// Create a bounded outbound queue
pub fn outbound_queue(capacity: usize) -> (Outbound, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (Outbound { tx }, rx)
}

impl Outbound {
    /// Enqueue without waiting
    pub fn try_send(
        &self,
        message: ChatMessage,
    ) -> std::result::Result<(), mpsc::error::TrySendError<ChatMessage>> {
        self.tx.try_send(message)
    }

    /// Enqueue, waiting for free capacity
    pub async fn send(
        &self,
        message: ChatMessage,
    ) -> std::result::Result<(), mpsc::error::SendError<ChatMessage>> {
        self.tx.send(message).await
    }
}
