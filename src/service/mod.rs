//! # Channels
//!
//! The collaborator-facing API: `send(&[u8])` and `receive() -> Vec<u8>`.
//!
//! - [`SecureChannel`] runs over an ordered byte stream and treats any gap in
//!   the sequence as fatal.
//! - [`ReliableChannel`] runs over any [`FrameTransport`](crate::transport::FrameTransport)
//!   and recovers from loss, duplication and reordering with ACK/NACK
//!   retransmission.
//!
//! Both discard frames that fail authentication, integrity or freshness
//! checks and keep reading; structural faults end the call.

use crate::config::ChannelConfig;
use crate::core::packet::PacketCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{Crypto, SharedKey};
use tracing::warn;

pub mod reliable;
pub mod secure;

pub use reliable::ReliableChannel;
pub use secure::{ChannelReceiver, ChannelSender, SecureChannel};

pub(crate) fn packet_codec(key: SharedKey, channel: &ChannelConfig) -> PacketCodec {
    PacketCodec::new(Crypto::new(key), channel.mac_len, channel.max_payload)
}

/// Counts consecutive replay rejections and turns a run of them into an error
#[derive(Debug, Clone)]
pub(crate) struct ReplayEscalation {
    threshold: u32,
    consecutive: u32,
}

impl ReplayEscalation {
    /// A threshold of zero never escalates.
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
        }
    }

    /// Record one rejected packet; fails once the run reaches the threshold.
    pub(crate) fn record(&mut self, reason: &str) -> Result<()> {
        self.consecutive = self.consecutive.saturating_add(1);
        warn!(
            reason,
            consecutive = self.consecutive,
            "Replayed packet discarded"
        );
        if self.threshold > 0 && self.consecutive >= self.threshold {
            let consecutive = self.consecutive;
            self.consecutive = 0;
            return Err(ProtocolError::Replay(format!(
                "{}: {consecutive} in a row",
                constants::ERR_REPLAY_ESCALATION
            )));
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.consecutive = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_threshold() {
        let mut escalation = ReplayEscalation::new(3);
        escalation.record("a").unwrap();
        escalation.record("b").unwrap();
        assert!(matches!(
            escalation.record("c"),
            Err(ProtocolError::Replay(_))
        ));
        // Counter restarts after surfacing.
        escalation.record("d").unwrap();
    }

    #[test]
    fn test_escalation_reset_and_disabled() {
        let mut escalation = ReplayEscalation::new(2);
        escalation.record("a").unwrap();
        escalation.reset();
        escalation.record("b").unwrap();

        let mut never = ReplayEscalation::new(0);
        for _ in 0..100 {
            never.record("x").unwrap();
        }
    }
}
