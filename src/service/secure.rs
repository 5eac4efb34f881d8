//! Stream channel: fragmentation over an ordered, reliable byte stream.
//!
//! Sending writes every fragment and the terminator in order, then flushes.
//! Receiving reads frames until a terminator completes a message. Rejected
//! frames are logged and skipped, as are authenticated DATA packets whose
//! sequence number was already delivered. A forward sequence gap, malformed
//! framing or a closed stream aborts the in-flight message.

use crate::config::ProtocolConfig;
use crate::core::codec::FrameCodec;
use crate::core::packet::{PacketCodec, PacketType};
use crate::error::{ProtocolError, Result};
use crate::protocol::fragment::{fragment, Reassembler, SequenceCounter};
use crate::service::{packet_codec, ReplayEscalation};
use crate::utils::crypto::SharedKey;
use crate::utils::freshness::FreshnessContext;
use crate::utils::metrics::ChannelMetrics;
use crate::utils::timeout::with_timeout_error;

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};

/// A secure channel over one byte stream
///
/// Both directions share the connection's [`FreshnessContext`] and metrics.
/// Use [`split`](Self::split) to drive sending and receiving from separate
/// tasks.
pub struct SecureChannel<S> {
    sender: ChannelSender<WriteHalf<S>>,
    receiver: ChannelReceiver<ReadHalf<S>>,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Build a channel from a loaded configuration.
    ///
    /// The key comes from `channel.key_hex`; the configuration is validated first.
    pub fn from_config(stream: S, config: &ProtocolConfig) -> Result<Self> {
        config.validate_strict()?;
        let key = config.shared_key()?;
        Ok(Self::new(stream, key, config))
    }

    /// Build a channel with an explicitly provisioned key.
    pub fn new(stream: S, key: SharedKey, config: &ProtocolConfig) -> Self {
        let codec = packet_codec(key, &config.channel);
        let freshness = FreshnessContext::new(config.freshness.policy.clone());
        let metrics = Arc::new(ChannelMetrics::new());
        let frames = FrameCodec::new(codec.max_wire_payload());
        let (read_half, write_half) = tokio::io::split(stream);

        debug!(
            policy = config.freshness.policy.name(),
            mac_len = codec.mac_len(),
            max_payload = codec.max_payload(),
            "Secure channel created"
        );

        Self {
            sender: ChannelSender {
                framed: FramedWrite::new(write_half, frames),
                codec: codec.clone(),
                freshness: freshness.clone(),
                seq: SequenceCounter::default(),
                metrics: Arc::clone(&metrics),
            },
            receiver: ChannelReceiver {
                framed: FramedRead::new(read_half, frames),
                codec,
                freshness,
                reassembler: Reassembler::new(0),
                metrics,
                escalation: ReplayEscalation::new(config.freshness.replay_escalation_threshold),
                recv_timeout: config.channel.recv_timeout,
            },
        }
    }

    /// Send one whole message.
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        self.sender.send(message).await
    }

    /// Wait for the next whole message.
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        self.receiver.receive().await
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.sender.metrics
    }

    pub fn freshness(&self) -> &FreshnessContext {
        &self.sender.freshness
    }

    /// Separate the two directions so they can run on different tasks.
    pub fn split(self) -> (ChannelSender<WriteHalf<S>>, ChannelReceiver<ReadHalf<S>>) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a [`SecureChannel`]
pub struct ChannelSender<W> {
    framed: FramedWrite<W, FrameCodec>,
    codec: PacketCodec,
    freshness: FreshnessContext,
    seq: SequenceCounter,
    metrics: Arc<ChannelMetrics>,
}

impl<W> ChannelSender<W>
where
    W: AsyncWrite + Unpin,
{
    /// Fragment, seal and write `message`, then the terminator.
    #[instrument(skip(self, message), fields(len = message.len()), level = "debug")]
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        let first = self.seq.peek();
        for chunk in fragment(message, self.codec.max_payload()) {
            self.feed(chunk).await?;
        }
        self.feed(&[]).await?;
        self.framed.flush().await?;

        self.metrics.message_sent(message.len() as u64);
        info!(
            first_seq = first,
            terminator_seq = self.seq.peek().wrapping_sub(1),
            "Message sent"
        );
        Ok(())
    }

    async fn feed(&mut self, payload: &[u8]) -> Result<()> {
        let freshness = self.freshness.issue()?;
        let frame = self
            .codec
            .encode(self.seq.peek(), PacketType::Data, payload, freshness)?;
        self.framed.feed(frame).await?;
        self.seq.next();
        self.metrics.packet_sent();
        Ok(())
    }

    pub fn metrics(&self) -> Arc<ChannelMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Sequence number the next DATA packet will carry.
    pub fn next_seq(&self) -> u16 {
        self.seq.peek()
    }
}

/// Receiving half of a [`SecureChannel`]
pub struct ChannelReceiver<R> {
    framed: FramedRead<R, FrameCodec>,
    codec: PacketCodec,
    freshness: FreshnessContext,
    reassembler: Reassembler,
    metrics: Arc<ChannelMetrics>,
    escalation: ReplayEscalation,
    recv_timeout: Duration,
}

impl<R> ChannelReceiver<R>
where
    R: AsyncRead + Unpin,
{
    /// Read frames until a terminator completes a message.
    ///
    /// Honors the configured `recv_timeout`; zero blocks until a message
    /// arrives or the stream closes.
    #[instrument(skip(self), level = "debug")]
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        let timeout = self.recv_timeout;
        with_timeout_error(self.read_message(), timeout).await
    }

    async fn read_message(&mut self) -> Result<Vec<u8>> {
        loop {
            let frame = match self.framed.next().await {
                Some(frame) => frame?,
                None => return Err(ProtocolError::ConnectionClosed),
            };

            let packet = match self.codec.decode(&frame, &self.freshness) {
                Ok(packet) => packet,
                Err(err) => {
                    self.discard(err)?;
                    continue;
                }
            };
            self.metrics.packet_received();

            if packet.packet_type != PacketType::Data {
                self.escalation.reset();
                debug!(
                    seq = packet.seq_num,
                    packet_type = packet.packet_type.name(),
                    "Control packet ignored on stream"
                );
                continue;
            }

            let seq = packet.seq_num;
            match self.reassembler.accept(seq, packet.payload) {
                Ok(Some(message)) => {
                    self.escalation.reset();
                    self.metrics.message_received(message.len() as u64);
                    info!(terminator_seq = seq, len = message.len(), "Message received");
                    return Ok(message);
                }
                Ok(None) => self.escalation.reset(),
                // Replayed after its freshness token aged out of the cache.
                Err(err @ ProtocolError::Replay(_)) => self.discard(err)?,
                Err(err) => {
                    warn!(error = %err, "Sequence violation, dropping message");
                    return Err(err);
                }
            }
        }
    }

    /// Swallow per-packet rejections; anything else ends the read.
    fn discard(&mut self, err: ProtocolError) -> Result<()> {
        match err {
            ProtocolError::Authentication { seq } => {
                self.metrics.authentication_failure();
                warn!(seq, "Packet failed authentication, discarded");
                Ok(())
            }
            ProtocolError::Integrity { seq } => {
                self.metrics.integrity_failure();
                warn!(seq, "Packet failed integrity check, discarded");
                Ok(())
            }
            ProtocolError::Replay(reason) => {
                self.metrics.replay_rejected();
                self.escalation.record(&reason)
            }
            other => Err(other),
        }
    }

    pub fn metrics(&self) -> Arc<ChannelMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Sequence number the next DATA packet must carry.
    pub fn expected_seq(&self) -> u16 {
        self.reassembler.expected()
    }
}
