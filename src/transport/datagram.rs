use bytes::Bytes;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, instrument, trace};

use crate::core::packet::HEADER_LEN;
use crate::error::Result;
use crate::transport::FrameTransport;
use crate::utils::crypto::MAX_MAC_LEN;

/// One frame per datagram over a connected UDP socket
///
/// UDP gives no ordering or delivery guarantee; pair this with
/// [`ReliableChannel`](crate::service::reliable::ReliableChannel).
#[derive(Debug)]
pub struct DatagramTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl DatagramTransport {
    /// Bind `local` and connect to `peer`.
    #[instrument(skip(local, peer))]
    pub async fn connect<A, B>(local: A, peer: B, max_wire_payload: usize) -> Result<Self>
    where
        A: ToSocketAddrs,
        B: ToSocketAddrs,
    {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        debug!(local = ?socket.local_addr()?, peer = ?socket.peer_addr()?, "Datagram transport connected");
        Ok(Self::from_socket(socket, max_wire_payload))
    }

    /// Wrap an already connected socket.
    pub fn from_socket(socket: UdpSocket, max_wire_payload: usize) -> Self {
        // One spare byte so an oversized datagram shows up as a length mismatch
        // instead of being silently truncated to a plausible frame.
        let capacity = HEADER_LEN + MAX_MAC_LEN + max_wire_payload + 1;
        Self {
            socket,
            buf: vec![0u8; capacity],
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.peer_addr()?)
    }
}

impl FrameTransport for DatagramTransport {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        match self.socket.send(&frame).await {
            Ok(_) => Ok(()),
            // The peer's port was closed; the datagram is lost like any other.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!(error = %e, "Datagram refused by peer");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn recv_frame(&mut self) -> Result<Bytes> {
        loop {
            match self.socket.recv(&mut self.buf).await {
                Ok(n) => {
                    trace!(len = n, "Datagram received");
                    return Ok(Bytes::copy_from_slice(&self.buf[..n]));
                }
                // ICMP unreachable for an earlier send; not a reason to stop reading.
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    debug!(error = %e, "Ignoring refused datagram notification");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
