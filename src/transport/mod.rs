//! # Frame Transports
//!
//! Moves sealed frames between two peers. A frame is one complete packet as
//! produced by [`PacketCodec::encode`](crate::core::packet::PacketCodec::encode);
//! transports never look inside it.
//!
//! ## Implementations
//! - **Stream**: any `AsyncRead + AsyncWrite` byte stream (TCP, Unix sockets,
//!   `tokio::io::duplex`), framed by [`FrameCodec`](crate::core::codec::FrameCodec)
//! - **Datagram**: a connected UDP socket, one frame per datagram
//! - **Memory**: an in-process channel pair for tests and local plumbing

use crate::error::Result;
use bytes::Bytes;
use std::future::Future;

pub mod datagram;
pub mod memory;
pub mod stream;

pub use datagram::DatagramTransport;
pub use memory::MemoryTransport;
pub use stream::StreamTransport;

/// Bidirectional, frame-oriented I/O
///
/// `recv_frame` must be cancel-safe: callers race it against deadlines and
/// drop the future when the deadline wins.
pub trait FrameTransport: Send {
    /// Write one frame.
    fn send_frame(&mut self, frame: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next frame. A closed peer yields `ConnectionClosed`.
    fn recv_frame(&mut self) -> impl Future<Output = Result<Bytes>> + Send;
}
