//! Fragmentation and strict in-order reassembly.
//!
//! A message is cut into chunks of at most `max_payload` bytes, one per DATA
//! packet with consecutive sequence numbers, followed by a zero-length
//! terminator. The receiving side of a stream accepts exactly the next
//! sequence number; any gap is a structural fault because the transport below
//! is already ordered.
//!
//! Sequence numbers are 16-bit and continue across messages for the life of a
//! connection, so both peers must start their counters at the same value.

use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;
use tracing::trace;

/// Split `message` into fragment payloads. An empty message has none.
pub fn fragment(message: &[u8], max_payload: usize) -> impl Iterator<Item = &[u8]> {
    message.chunks(max_payload.max(1))
}

/// Number of DATA packets (terminator included) a message occupies.
pub fn packet_count(message_len: usize, max_payload: usize) -> usize {
    message_len.div_ceil(max_payload.max(1)) + 1
}

/// Wrapping 16-bit sequence counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter(u16);

impl SequenceCounter {
    pub fn starting_at(seq: u16) -> Self {
        Self(seq)
    }

    /// Value the next packet will carry.
    pub fn peek(&self) -> u16 {
        self.0
    }

    /// Take the current value and advance modulo 2^16.
    pub fn next(&mut self) -> u16 {
        let seq = self.0;
        self.0 = self.0.wrapping_add(1);
        seq
    }
}

/// Receiver-side state for the ordered stream path.
#[derive(Debug, Default)]
pub struct Reassembler {
    expected: SequenceCounter,
    fragments: Vec<Bytes>,
    buffered: usize,
}

impl Reassembler {
    pub fn new(first_seq: u16) -> Self {
        Self {
            expected: SequenceCounter::starting_at(first_seq),
            fragments: Vec::new(),
            buffered: 0,
        }
    }

    /// Sequence number the next DATA packet must carry.
    pub fn expected(&self) -> u16 {
        self.expected.peek()
    }

    /// Bytes held for the in-flight message.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Accept one authenticated DATA packet.
    ///
    /// Returns the whole message once the terminator arrives. A sequence
    /// number behind the expected one was already delivered and fails with
    /// `Replay`, leaving state untouched. A forward gap discards the in-flight
    /// message and fails with `Sequence`.
    pub fn accept(&mut self, seq: u16, payload: Bytes) -> Result<Option<Vec<u8>>> {
        let expected = self.expected.peek();
        let behind = expected.wrapping_sub(seq);
        if (1..0x8000).contains(&behind) {
            return Err(ProtocolError::Replay(format!(
                "{}: seq {seq}, expected {expected}",
                constants::ERR_STALE_SEQUENCE
            )));
        }
        if seq != expected {
            self.fragments.clear();
            self.buffered = 0;
            return Err(ProtocolError::Sequence { expected, got: seq });
        }
        self.expected.next();

        if payload.is_empty() {
            let mut message = Vec::with_capacity(self.buffered);
            for part in self.fragments.drain(..) {
                message.extend_from_slice(&part);
            }
            self.buffered = 0;
            trace!(seq, len = message.len(), "Terminator closed message");
            return Ok(Some(message));
        }

        self.buffered += payload.len();
        self.fragments.push(payload);
        Ok(None)
    }
}
