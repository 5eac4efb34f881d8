//! Retransmitting channel for transports that may drop, duplicate or reorder
//! frames.
//!
//! ```text
//! sender:   IDLE -> SENDING -> {retransmit unacked, wait}* -> ALL_ACKED -> AWAIT_DONE -> CLOSED
//! receiver: WAIT -> PARSE -> (STORE + ACK | NACK) -> ... -> TERMINATOR -> REASSEMBLE -> SEND_DONE -> CLOSED
//! ```
//!
//! `receive` hands the message back as soon as DONE is sent. A late END or a
//! duplicate fragment from the delivered message is answered by whichever call
//! reads the transport next, `send` included. Call [`finish`](ReliableChannel::finish)
//! before dropping a channel whose last act was a `receive`.
//!
//! Every transmission, first or repeated, is sealed afresh: a new IV and a new
//! freshness token, so the receiver's replay guard never mistakes a
//! retransmission for a replay. Frames replayed verbatim by a third party are
//! still rejected.
//!
//! Each direction has its own sequence space starting at 0. A send that times
//! out leaves the peer's reorder state unknown; treat the channel as broken.

use crate::config::{ProtocolConfig, ReliabilityConfig};
use crate::core::packet::{Packet, PacketCodec, PacketType};
use crate::error::{ProtocolError, Result};
use crate::protocol::fragment::SequenceCounter;
use crate::protocol::retransmit::{PendingSend, Placement, ReorderBuffer};
use crate::service::{packet_codec, ReplayEscalation};
use crate::transport::FrameTransport;
use crate::utils::crypto::SharedKey;
use crate::utils::freshness::FreshnessContext;
use crate::utils::metrics::ChannelMetrics;
use crate::utils::timeout::{until_deadline, with_timeout_error};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// ACK/NACK retransmission over any [`FrameTransport`]
pub struct ReliableChannel<T> {
    transport: T,
    codec: PacketCodec,
    freshness: FreshnessContext,
    metrics: Arc<ChannelMetrics>,
    settings: ReliabilityConfig,
    escalation: ReplayEscalation,
    recv_timeout: Duration,
    next_send: SequenceCounter,
    inbound: ReorderBuffer,
    last_delivered: Option<u16>,
}

impl<T: FrameTransport> ReliableChannel<T> {
    /// Build a channel from a loaded configuration.
    pub fn from_config(transport: T, config: &ProtocolConfig) -> Result<Self> {
        config.validate_strict()?;
        let key = config.shared_key()?;
        Ok(Self::new(transport, key, config))
    }

    pub fn new(transport: T, key: SharedKey, config: &ProtocolConfig) -> Self {
        Self {
            transport,
            codec: packet_codec(key, &config.channel),
            freshness: FreshnessContext::new(config.freshness.policy.clone()),
            metrics: Arc::new(ChannelMetrics::new()),
            settings: config.reliability.clone(),
            escalation: ReplayEscalation::new(config.freshness.replay_escalation_threshold),
            recv_timeout: config.channel.recv_timeout,
            next_send: SequenceCounter::default(),
            inbound: ReorderBuffer::new(0),
            last_delivered: None,
        }
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    pub fn freshness(&self) -> &FreshnessContext {
        &self.freshness
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deliver `message`, retransmitting until every fragment is acknowledged.
    ///
    /// Fails with `Timeout` after `max_retransmit_rounds` rounds without full
    /// acknowledgement. A missing DONE after full acknowledgement is only
    /// logged.
    #[instrument(skip(self, message), fields(len = message.len()))]
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        let mut pending = PendingSend::new(self.next_send.peek(), message, self.codec.max_payload())?;
        self.next_send = SequenceCounter::starting_at(pending.next_base());

        let max_rounds = self.settings.max_retransmit_rounds.max(1);
        let mut rounds = 0u32;
        let mut done = false;

        while !pending.is_complete() {
            if rounds == max_rounds {
                warn!(
                    rounds,
                    outstanding = pending.outstanding(),
                    "Giving up on unacknowledged fragments"
                );
                return Err(ProtocolError::Timeout);
            }
            for (seq, payload) in pending.unacked() {
                if rounds > 0 {
                    self.metrics.retransmission();
                }
                self.send_packet(seq, PacketType::Data, &payload).await?;
            }
            rounds += 1;

            let deadline = Instant::now() + self.settings.ack_timeout;
            while !pending.is_complete() {
                let frame = match until_deadline(self.transport.recv_frame(), deadline).await {
                    Some(frame) => frame?,
                    None => {
                        self.metrics.ack_timeout();
                        debug!(
                            round = rounds,
                            outstanding = pending.outstanding(),
                            "Acknowledgement round expired"
                        );
                        break;
                    }
                };
                let Some(packet) = self.open(&frame, false).await? else {
                    continue;
                };
                let seq = packet.seq_num;
                match packet.packet_type {
                    PacketType::Ack => {
                        if pending.on_ack(seq) {
                            debug!(seq, "Fragment acknowledged");
                        }
                    }
                    PacketType::Nack => {
                        self.metrics.nack_received();
                        if let Some(payload) =
                            pending.payload(seq).filter(|_| pending.is_outstanding(seq)).cloned()
                        {
                            debug!(seq, "NACK received, resending");
                            self.metrics.retransmission();
                            self.send_packet(seq, PacketType::Data, &payload).await?;
                        }
                    }
                    PacketType::Done if seq == pending.terminator_seq() => {
                        pending.retire_all();
                        done = true;
                    }
                    PacketType::Data => self.accept_data(packet).await?,
                    PacketType::End => self.answer_end(seq).await?,
                    PacketType::Done => {
                        debug!(seq, "Stale DONE ignored");
                    }
                }
            }
        }

        if !done {
            self.await_done(&pending, max_rounds).await?;
        }

        self.metrics.message_sent(message.len() as u64);
        info!(
            first_seq = pending.base(),
            terminator_seq = pending.terminator_seq(),
            rounds,
            "Message delivered"
        );
        Ok(())
    }

    /// Announce completion with END until the receiver answers DONE.
    async fn await_done(&mut self, pending: &PendingSend, max_rounds: u32) -> Result<()> {
        let terminator = pending.terminator_seq();
        for attempt in 0..max_rounds {
            self.send_packet(terminator, PacketType::End, &[]).await?;
            let deadline = Instant::now() + self.settings.ack_timeout;
            loop {
                let frame = match until_deadline(self.transport.recv_frame(), deadline).await {
                    Some(frame) => frame?,
                    None => break,
                };
                let Some(packet) = self.open(&frame, false).await? else {
                    continue;
                };
                match packet.packet_type {
                    PacketType::Done if packet.seq_num == terminator => {
                        debug!(terminator, attempt, "Completion confirmed");
                        return Ok(());
                    }
                    PacketType::Data => self.accept_data(packet).await?,
                    PacketType::End => self.answer_end(packet.seq_num).await?,
                    _ => {}
                }
            }
        }
        warn!(terminator, "No DONE received; all fragments were acknowledged");
        Ok(())
    }

    /// Wait for the next whole message, acknowledging fragments as they land.
    #[instrument(skip(self))]
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        let timeout = self.recv_timeout;
        let (terminator, message) = with_timeout_error(self.collect(), timeout).await?;

        self.send_control(PacketType::Done, terminator).await?;
        self.last_delivered = Some(terminator);

        self.metrics.message_received(message.len() as u64);
        info!(terminator_seq = terminator, len = message.len(), "Message received");
        Ok(message)
    }

    async fn collect(&mut self) -> Result<(u16, Vec<u8>)> {
        loop {
            if let Some(complete) = self.inbound.take_message() {
                return Ok(complete);
            }
            let frame = self.transport.recv_frame().await?;
            let Some(packet) = self.open(&frame, true).await? else {
                continue;
            };
            match packet.packet_type {
                PacketType::Data => self.accept_data(packet).await?,
                PacketType::End => self.answer_end(packet.seq_num).await?,
                PacketType::Ack | PacketType::Nack | PacketType::Done => {
                    debug!(
                        seq = packet.seq_num,
                        packet_type = packet.packet_type.name(),
                        "Control packet ignored while receiving"
                    );
                }
            }
        }
    }

    /// Keep answering the peer for up to `done_linger` so a lost DONE or ACK
    /// does not strand its last send.
    ///
    /// Ends early once the next message starts arriving; its fragments are
    /// kept for the next `receive`. Transport errors just end the wait.
    #[instrument(skip(self))]
    pub async fn finish(&mut self) {
        let deadline = Instant::now() + self.settings.done_linger;
        loop {
            let frame = match until_deadline(self.transport.recv_frame(), deadline).await {
                None => return,
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    debug!(error = %err, "Linger ended by transport");
                    return;
                }
            };
            let packet = match self.open(&frame, false).await {
                Ok(Some(packet)) => packet,
                Ok(None) => continue,
                Err(err) => {
                    debug!(error = %err, "Linger ended");
                    return;
                }
            };
            let outcome = match packet.packet_type {
                PacketType::End => self.answer_end(packet.seq_num).await.map(|_| false),
                PacketType::Data => {
                    let next_message = packet.seq_num.wrapping_sub(self.inbound.base()) < 0x8000;
                    self.accept_data(packet).await.map(|_| next_message)
                }
                _ => Ok(false),
            };
            match outcome {
                Ok(false) => {}
                Ok(true) => {
                    debug!("Next message started, leaving linger");
                    return;
                }
                Err(err) => {
                    debug!(error = %err, "Linger ended");
                    return;
                }
            }
        }
    }

    /// Reply DONE to an END for a message this side already holds in full.
    async fn answer_end(&mut self, seq: u16) -> Result<()> {
        let delivered = self.last_delivered == Some(seq);
        let assembled = self.inbound.is_complete() && self.inbound.terminator_seq() == Some(seq);
        if delivered || assembled {
            debug!(seq, "Answering END with DONE");
            self.send_control(PacketType::Done, seq).await
        } else {
            debug!(seq, "END for unfinished message ignored");
            Ok(())
        }
    }

    /// File a DATA packet and acknowledge it.
    async fn accept_data(&mut self, packet: Packet) -> Result<()> {
        let seq = packet.seq_num;
        match self.inbound.insert(seq, packet.payload)? {
            Placement::Stored => {
                debug!(seq, "Fragment stored");
                self.send_control(PacketType::Ack, seq).await
            }
            Placement::Duplicate | Placement::Stale => {
                debug!(seq, "Duplicate fragment, re-acknowledging");
                self.send_control(PacketType::Ack, seq).await
            }
            Placement::Ahead => {
                debug!(seq, "Fragment beyond terminator dropped");
                Ok(())
            }
        }
    }

    /// Decode a frame, handling rejections in place.
    ///
    /// Replays only escalate while `escalate` is set (inside `receive`).
    async fn open(&mut self, frame: &[u8], escalate: bool) -> Result<Option<Packet>> {
        match self.codec.decode(frame, &self.freshness) {
            Ok(packet) => {
                self.escalation.reset();
                self.metrics.packet_received();
                Ok(Some(packet))
            }
            Err(ProtocolError::Integrity { seq }) => {
                self.metrics.integrity_failure();
                warn!(seq, "Packet failed integrity check, requesting resend");
                self.send_control(PacketType::Nack, seq).await?;
                Ok(None)
            }
            Err(ProtocolError::Authentication { seq }) => {
                self.metrics.authentication_failure();
                warn!(seq, "Packet failed authentication, discarded");
                if self.settings.nack_on_auth_failure {
                    self.send_control(PacketType::Nack, seq).await?;
                }
                Ok(None)
            }
            Err(ProtocolError::Replay(reason)) => {
                self.metrics.replay_rejected();
                if escalate {
                    self.escalation.record(&reason)?;
                } else {
                    debug!(reason = %reason, "Replayed packet discarded");
                }
                Ok(None)
            }
            Err(ProtocolError::Format(reason)) => {
                // Anyone can aim a datagram at an open socket.
                warn!(reason = %reason, len = frame.len(), "Malformed frame dropped");
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    async fn send_control(&mut self, packet_type: PacketType, seq: u16) -> Result<()> {
        if packet_type == PacketType::Nack {
            self.metrics.nack_sent();
        }
        self.send_packet(seq, packet_type, &[]).await
    }

    async fn send_packet(&mut self, seq: u16, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        let freshness = self.freshness.issue()?;
        let frame = self.codec.encode(seq, packet_type, payload, freshness)?;
        self.transport.send_frame(frame).await?;
        self.metrics.packet_sent();
        Ok(())
    }
}
