//! Selective-repeat bookkeeping for the unordered (datagram) path.
//!
//! [`PendingSend`] tracks which fragments of an outgoing message are still
//! unacknowledged; [`ReorderBuffer`] places incoming fragments by their
//! offset from the message's first sequence number. Both only manage state;
//! encoding, sockets and timers belong to the caller.
//!
//! Offsets are computed with wrapping arithmetic, so a message may straddle
//! the 16-bit wrap. Offsets at or above `0x8000` are treated as belonging to
//! an earlier message.

use crate::error::{ProtocolError, Result};
use crate::protocol::fragment::fragment;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

/// Packets (terminator included) one message may occupy
pub const MAX_MESSAGE_PACKETS: usize = 0x7FFF;

/// Offsets at or beyond this point are in the past
const STALE_OFFSET: u16 = 0x8000;

/// Fragments of one outgoing message awaiting acknowledgement
#[derive(Debug)]
pub struct PendingSend {
    base: u16,
    fragments: Vec<Bytes>,
    unacked: BTreeSet<u16>,
}

impl PendingSend {
    /// Cut `message` into fragments starting at sequence `base`.
    ///
    /// The last entry is always the empty terminator.
    pub fn new(base: u16, message: &[u8], max_payload: usize) -> Result<Self> {
        let mut fragments: Vec<Bytes> = fragment(message, max_payload)
            .map(Bytes::copy_from_slice)
            .collect();
        fragments.push(Bytes::new());
        if fragments.len() > MAX_MESSAGE_PACKETS {
            return Err(ProtocolError::OversizedMessage(message.len()));
        }
        let unacked = (0..fragments.len() as u16).collect();
        Ok(Self {
            base,
            fragments,
            unacked,
        })
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// Packets in this message, terminator included.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn terminator_seq(&self) -> u16 {
        self.base.wrapping_add(self.fragments.len() as u16 - 1)
    }

    /// First sequence number after this message.
    pub fn next_base(&self) -> u16 {
        self.base.wrapping_add(self.fragments.len() as u16)
    }

    fn offset_of(&self, seq: u16) -> Option<u16> {
        let offset = seq.wrapping_sub(self.base);
        ((offset as usize) < self.fragments.len()).then_some(offset)
    }

    /// Payload carried by `seq`, if it belongs to this message.
    pub fn payload(&self, seq: u16) -> Option<&Bytes> {
        self.offset_of(seq)
            .map(|offset| &self.fragments[offset as usize])
    }

    /// Retire `seq`. Returns `true` if it was outstanding.
    pub fn on_ack(&mut self, seq: u16) -> bool {
        match self.offset_of(seq) {
            Some(offset) => self.unacked.remove(&offset),
            None => false,
        }
    }

    /// Retire every fragment at once (peer reported the message complete).
    pub fn retire_all(&mut self) {
        self.unacked.clear();
    }

    pub fn is_outstanding(&self, seq: u16) -> bool {
        self.offset_of(seq)
            .is_some_and(|offset| self.unacked.contains(&offset))
    }

    pub fn is_complete(&self) -> bool {
        self.unacked.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.unacked.len()
    }

    /// Unacknowledged `(seq, payload)` pairs in send order.
    pub fn unacked(&self) -> Vec<(u16, Bytes)> {
        self.unacked
            .iter()
            .map(|&offset| {
                (
                    self.base.wrapping_add(offset),
                    self.fragments[offset as usize].clone(),
                )
            })
            .collect()
    }
}

/// Where an incoming fragment landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// New fragment of the current message
    Stored,
    /// Already held; the peer missed our ACK
    Duplicate,
    /// Belongs to a message that was already delivered
    Stale,
    /// Lies beyond the terminator of the current message
    Ahead,
}

/// Receiver-side buffer that reorders fragments of one message
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    base: u16,
    fragments: BTreeMap<u16, Bytes>,
    terminator: Option<u16>,
    buffered: usize,
}

impl ReorderBuffer {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    /// First sequence number of the message being collected.
    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Place one authenticated DATA fragment.
    pub fn insert(&mut self, seq: u16, payload: Bytes) -> Result<Placement> {
        let offset = seq.wrapping_sub(self.base);
        if offset >= STALE_OFFSET {
            return Ok(Placement::Stale);
        }
        if offset as usize >= MAX_MESSAGE_PACKETS {
            return Err(ProtocolError::OversizedMessage(self.buffered));
        }

        if payload.is_empty() {
            return Ok(match self.terminator {
                Some(end) if end == offset => Placement::Duplicate,
                Some(end) if offset > end => Placement::Ahead,
                _ => {
                    // Anything already stored past the new end is not ours.
                    for (_, dropped) in self.fragments.split_off(&offset) {
                        self.buffered -= dropped.len();
                    }
                    self.terminator = Some(offset);
                    Placement::Stored
                }
            });
        }

        if self.terminator.is_some_and(|end| offset >= end) {
            return Ok(Placement::Ahead);
        }
        if self.fragments.contains_key(&offset) {
            return Ok(Placement::Duplicate);
        }
        self.buffered += payload.len();
        self.fragments.insert(offset, payload);
        Ok(Placement::Stored)
    }

    /// Sequence number of the terminator, once seen.
    pub fn terminator_seq(&self) -> Option<u16> {
        self.terminator.map(|end| self.base.wrapping_add(end))
    }

    /// Terminator seen and every offset before it present.
    pub fn is_complete(&self) -> bool {
        self.terminator
            .is_some_and(|end| self.fragments.len() == end as usize)
    }

    /// Missing sequence numbers below the terminator.
    pub fn missing(&self) -> Vec<u16> {
        let end = match self.terminator {
            Some(end) => end,
            None => return Vec::new(),
        };
        (0..end)
            .filter(|offset| !self.fragments.contains_key(offset))
            .map(|offset| self.base.wrapping_add(offset))
            .collect()
    }

    /// Hand out the finished message with its terminator's sequence number
    /// and move on to the next one.
    pub fn take_message(&mut self) -> Option<(u16, Vec<u8>)> {
        if !self.is_complete() {
            return None;
        }
        let end = self.terminator.take()?;
        let terminator_seq = self.base.wrapping_add(end);
        let mut message = Vec::with_capacity(self.buffered);
        for part in std::mem::take(&mut self.fragments).into_values() {
            message.extend_from_slice(&part);
        }
        self.base = self.base.wrapping_add(end + 1);
        self.buffered = 0;
        Some((terminator_seq, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_layout() {
        let pending = PendingSend::new(10, &[1u8; 2000], 512).unwrap();
        assert_eq!(pending.len(), 5);
        assert_eq!(pending.terminator_seq(), 14);
        assert_eq!(pending.next_base(), 15);
        assert!(pending.payload(14).unwrap().is_empty());
        assert_eq!(pending.payload(13).unwrap().len(), 2000 - 3 * 512);
        assert!(pending.payload(15).is_none());
        assert!(pending.payload(9).is_none());
    }

    #[test]
    fn test_pending_acks() {
        let mut pending = PendingSend::new(0, b"abcdef", 2).unwrap();
        assert_eq!(pending.outstanding(), 4);
        assert!(pending.on_ack(1));
        assert!(!pending.on_ack(1));
        assert!(!pending.on_ack(99));
        let left: Vec<u16> = pending.unacked().into_iter().map(|(s, _)| s).collect();
        assert_eq!(left, vec![0, 2, 3]);
        pending.retire_all();
        assert!(pending.is_complete());
    }

    #[test]
    fn test_pending_wraps() {
        let mut pending = PendingSend::new(u16::MAX, b"ab", 1).unwrap();
        assert_eq!(pending.terminator_seq(), 1);
        assert!(pending.is_outstanding(0));
        assert!(pending.on_ack(u16::MAX));
        assert!(pending.on_ack(0));
        assert!(pending.on_ack(1));
        assert!(pending.is_complete());
    }

    #[test]
    fn test_pending_oversized() {
        let message = vec![0u8; MAX_MESSAGE_PACKETS];
        assert!(matches!(
            PendingSend::new(0, &message, 1),
            Err(ProtocolError::OversizedMessage(_))
        ));
        assert!(PendingSend::new(0, &message[..MAX_MESSAGE_PACKETS - 1], 1).is_ok());
    }

    #[test]
    fn test_reorder_out_of_order() {
        let mut buf = ReorderBuffer::new(100);
        assert_eq!(buf.insert(102, Bytes::new()).unwrap(), Placement::Stored);
        assert_eq!(buf.missing(), vec![100, 101]);
        assert_eq!(
            buf.insert(101, Bytes::from_static(b"lo")).unwrap(),
            Placement::Stored
        );
        assert!(!buf.is_complete());
        assert_eq!(
            buf.insert(100, Bytes::from_static(b"hel")).unwrap(),
            Placement::Stored
        );
        assert!(buf.is_complete());
        assert_eq!(buf.take_message().unwrap(), (102, b"hello".to_vec()));
        assert_eq!(buf.base(), 103);
    }

    #[test]
    fn test_reorder_duplicates_and_stale() {
        let mut buf = ReorderBuffer::new(0);
        buf.insert(0, Bytes::from_static(b"a")).unwrap();
        assert_eq!(
            buf.insert(0, Bytes::from_static(b"a")).unwrap(),
            Placement::Duplicate
        );
        buf.insert(1, Bytes::new()).unwrap();
        assert_eq!(buf.insert(1, Bytes::new()).unwrap(), Placement::Duplicate);
        assert_eq!(
            buf.insert(5, Bytes::from_static(b"z")).unwrap(),
            Placement::Ahead
        );
        assert_eq!(buf.take_message().unwrap().1, b"a");

        assert_eq!(
            buf.insert(0, Bytes::from_static(b"a")).unwrap(),
            Placement::Stale
        );
        assert_eq!(buf.insert(1, Bytes::new()).unwrap(), Placement::Stale);
    }

    #[test]
    fn test_reorder_empty_message() {
        let mut buf = ReorderBuffer::new(7);
        buf.insert(7, Bytes::new()).unwrap();
        assert_eq!(buf.take_message().unwrap(), (7, Vec::new()));
        assert_eq!(buf.base(), 8);
    }

    #[test]
    fn test_reorder_wrap() {
        let mut buf = ReorderBuffer::new(u16::MAX);
        buf.insert(0, Bytes::from_static(b"y")).unwrap();
        buf.insert(u16::MAX, Bytes::from_static(b"x")).unwrap();
        buf.insert(1, Bytes::new()).unwrap();
        assert_eq!(buf.take_message().unwrap(), (1, b"xy".to_vec()));
        assert_eq!(buf.base(), 2);
    }

    #[test]
    fn test_reorder_rejects_oversized_offset() {
        let mut buf = ReorderBuffer::new(0);
        assert!(matches!(
            buf.insert(MAX_MESSAGE_PACKETS as u16, Bytes::from_static(b"x")),
            Err(ProtocolError::OversizedMessage(_))
        ));
    }
}
