use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::trace;

use crate::core::codec::FrameCodec;
use crate::error::{ProtocolError, Result};
use crate::transport::FrameTransport;

/// Frames over an ordered byte stream
pub struct StreamTransport<S> {
    framed: Framed<S, FrameCodec>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream`, refusing frames with more than `max_wire_payload` bytes of payload.
    pub fn new(stream: S, max_wire_payload: usize) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new(max_wire_payload)),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

impl<S> FrameTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        trace!(len = frame.len(), "Writing frame to stream");
        self.framed.send(frame).await
    }

    async fn recv_frame(&mut self) -> Result<Bytes> {
        match self.framed.next().await {
            Some(frame) => Ok(frame?.freeze()),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = StreamTransport::new(a, 528);
        let mut right = StreamTransport::new(b, 528);

        // Header declaring a 4-byte payload and a 2-byte tag.
        let mut frame = vec![0u8; 16];
        frame[4] = 4;
        frame[15] = 2;
        frame.extend_from_slice(&[9; 6]);
        let frame = Bytes::from(frame);

        let writer = tokio::spawn(async move {
            left.send_frame(frame.clone()).await.unwrap();
            left.send_frame(frame).await.unwrap();
        });
        let first = right.recv_frame().await.unwrap();
        let second = right.recv_frame().await.unwrap();
        writer.await.unwrap();
        assert_eq!(first.len(), 22);
        assert_eq!(first, second);

        assert!(matches!(
            right.recv_frame().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
