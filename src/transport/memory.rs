use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ProtocolError, Result};
use crate::transport::FrameTransport;

/// In-process frame pipe
///
/// Frames arrive exactly as sent, in order. Dropping one end makes the other
/// end's reads fail with `ConnectionClosed` once its queue is drained.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryTransport {
    /// Two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

impl FrameTransport for MemoryTransport {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn recv_frame(&mut self) -> Result<Bytes> {
        self.rx.recv().await.ok_or(ProtocolError::ConnectionClosed)
    }
}
