//! Connection handler: the read side of one client connection
//!
//! The handler owns the session lifecycle: spawn the outbound writer, greet
//! the client, announce and register it with the coordinator, turn each
//! inbound line into a broadcast, and on disconnect run the leave path once.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::ChatConfig;
use crate::error::{ChatError, Result};
use crate::message::ChatMessage;
use crate::server::coordinator::CoordinatorHandle;
use crate::server::writer::OutboundWriter;
use crate::session::{Session, outbound_queue};

/// Why the read loop ended
#[derive(Debug)]
enum Disconnect {
    /// Peer closed its side of the stream
    Closed,
    /// Reading failed or produced an unusable line
    ReadError(ChatError),
    /// The coordinator evicted this session as a stalled consumer
    Evicted,
}

/// Per-connection handler
pub struct ConnectionHandler {
    session: Arc<Session>,
    coordinator: CoordinatorHandle,
    outbound_capacity: usize,
    max_line_length: usize,
}

impl ConnectionHandler {
    /// Create a handler with a fresh session for `addr`
    pub fn new(addr: SocketAddr, coordinator: CoordinatorHandle, config: &ChatConfig) -> Self {
        Self::with_session(Arc::new(Session::new(addr)), coordinator, config)
    }

    pub fn with_session(
        session: Arc<Session>,
        coordinator: CoordinatorHandle,
        config: &ChatConfig,
    ) -> Self {
        Self {
            session,
            coordinator,
            outbound_capacity: config.outbound_capacity.max(1),
            max_line_length: config.max_line_length,
        }
    }

    /// Run the connection to completion
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.session.id().clone();
        info!("New connection {} from {}", id, self.session.addr());

        // The writer exists before any event is emitted, so the welcome
        // message always has a live queue.
        let (outbound, queue) = outbound_queue(self.outbound_capacity);
        let mut writer_task = tokio::spawn(OutboundWriter::new(id.clone(), writer, queue).run());

        outbound
            .send(ChatMessage::welcome(&id))
            .await
            .map_err(|_| ChatError::internal("outbound queue closed before welcome"))?;
        self.coordinator
            .broadcast(ChatMessage::entered(&id))
            .await?;
        self.coordinator
            .join(Arc::clone(&self.session), outbound)
            .await?;

        let disconnect = self.read_lines(reader).await?;
        match &disconnect {
            Disconnect::Closed => debug!("Connection {} closed by peer", id),
            Disconnect::ReadError(e) => warn!("Read error on {}: {}", id, e),
            Disconnect::Evicted => warn!("Connection {} evicted as a slow consumer", id),
        }

        self.coordinator.leave(id.clone()).await?;
        self.coordinator.broadcast(ChatMessage::left(&id)).await?;
        info!("User {} left", id);

        // An evicted peer is not reading, so its writer may be stuck on a
        // full socket. Eviction can land after the read loop has already
        // seen EOF, so keep watching for it while the writer drains.
        tokio::select! {
            result = &mut writer_task => match result {
                Ok(Ok(())) => debug!("Writer for {} finished", id),
                Ok(Err(e)) => debug!("Writer for {} stopped early: {}", id, e),
                Err(e) => error!("Writer task for {} failed: {}", id, e),
            },
            _ = self.session.evicted() => {
                writer_task.abort();
                debug!("Writer for {} aborted after eviction", id);
            }
        }

        Ok(())
    }

    /// Broadcast one message per inbound line until the stream ends or the
    /// session is evicted. Only a closed coordinator is returned as an error.
    async fn read_lines<R>(&self, reader: R) -> Result<Disconnect>
    where
        R: AsyncRead + Unpin,
    {
        let id = self.session.id();
        let codec = LinesCodec::new_with_max_length(self.max_line_length);
        let mut lines = FramedRead::new(reader, codec);

        loop {
            tokio::select! {
                _ = self.session.evicted() => return Ok(Disconnect::Evicted),
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        self.coordinator
                            .broadcast(ChatMessage::chat_line(id, &line))
                            .await?;
                    }
                    Some(Err(e)) => return Ok(Disconnect::ReadError(e.into())),
                    None => return Ok(Disconnect::Closed),
                },
            }
        }
    }
}
