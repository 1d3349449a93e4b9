//! Outbound writer: drains one session's queue onto its stream

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::{OutboundReceiver, SessionId};

/// Per-connection writer task.
///
/// Runs until the coordinator closes the queue. A write error stops only this
/// writer; it does not make the session leave.
pub struct OutboundWriter<W> {
    session_id: SessionId,
    sink: FramedWrite<W, LinesCodec>,
    queue: OutboundReceiver,
}

impl<W> OutboundWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(session_id: SessionId, writer: W, queue: OutboundReceiver) -> Self {
        Self {
            session_id,
            sink: FramedWrite::new(writer, LinesCodec::new()),
            queue,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.queue.recv().await {
            if let Err(e) = self.sink.send(message.content).await {
                warn!("Write to {} failed: {}", self.session_id, e);
                return Err(e.into());
            }
        }

        debug!("Outbound queue for {} closed", self.session_id);
        // Flush and shut down the write side so the peer sees EOF.
        SinkExt::<String>::close(&mut self.sink).await?;
        Ok(())
    }
}
