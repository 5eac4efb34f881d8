//! Packet wire format and the authenticated encode/decode pipeline.
//!
//! ```text
//! 0      2    3      5        7           15        16
//! +------+----+------+--------+-----------+---------+-----------+--------------+
//! | seq  |type|length|checksum| freshness | mac_len | mac (N)   | payload (L)  |
//! | u16  | u8 | u16  |  u16   |    u64    |   u8    | mac_len B | length B     |
//! +------+----+------+--------+-----------+---------+-----------+--------------+
//! ```
//!
//! All integers are big-endian. For DATA packets with a non-empty body the
//! wire payload is `iv || ciphertext`; every other packet carries its payload
//! in the clear. The checksum covers the wire payload, the MAC covers
//! `header || wire payload`.
//!
//! Decoding verifies the MAC before anything else in the frame is trusted:
//! freshness, checksum and decryption all run on authenticated bytes only.

use crate::core::checksum;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{Crypto, IV_LEN, MAX_MAC_LEN, MIN_MAC_LEN};
use crate::utils::freshness::FreshnessContext;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

/// Fixed header length in bytes
pub const HEADER_LEN: usize = 16;

/// Default plaintext bytes per fragment
pub const DEFAULT_MAX_PAYLOAD: usize = 512;

/// Largest plaintext fragment that still fits the 16-bit length field once the IV is prepended
pub const MAX_PAYLOAD_LIMIT: usize = u16::MAX as usize - IV_LEN;

/// Packet kinds carried in the type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Message fragment; zero-length marks the end of a message
    Data = 0,
    /// Positive acknowledgement of one sequence number
    Ack = 1,
    /// Request to retransmit one sequence number
    Nack = 2,
    /// Sender's completion acknowledgement
    End = 3,
    /// Receiver's completion handshake
    Done = 4,
}

impl PacketType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Data => "DATA",
            PacketType::Ack => "ACK",
            PacketType::Nack => "NACK",
            PacketType::End => "END",
            PacketType::Done => "DONE",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Ack),
            2 => Ok(PacketType::Nack),
            3 => Ok(PacketType::End),
            4 => Ok(PacketType::Done),
            other => Err(ProtocolError::Format(format!(
                "{}: {other}",
                constants::ERR_UNKNOWN_PACKET_TYPE
            ))),
        }
    }
}

/// Fixed-width header as it appears on the wire
///
/// `type_code` stays raw until the MAC has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq_num: u16,
    pub type_code: u8,
    pub length: u16,
    pub checksum: u16,
    pub freshness: u64,
    pub mac_len: u8,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.seq_num.to_be_bytes());
        out[2] = self.type_code;
        out[3..5].copy_from_slice(&self.length.to_be_bytes());
        out[5..7].copy_from_slice(&self.checksum.to_be_bytes());
        out[7..15].copy_from_slice(&self.freshness.to_be_bytes());
        out[15] = self.mac_len;
        out
    }

    /// Parse the fixed header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Format(format!(
                "{}: {} < {HEADER_LEN} bytes",
                constants::ERR_SHORT_HEADER,
                bytes.len()
            )));
        }
        Ok(Self {
            seq_num: u16::from_be_bytes([bytes[0], bytes[1]]),
            type_code: bytes[2],
            length: u16::from_be_bytes([bytes[3], bytes[4]]),
            checksum: u16::from_be_bytes([bytes[5], bytes[6]]),
            freshness: u64::from_be_bytes([
                bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
            ]),
            mac_len: bytes[15],
        })
    }

    /// Total frame size this header announces.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.mac_len as usize + self.length as usize
    }
}

/// A decoded, authenticated packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq_num: u16,
    pub packet_type: PacketType,
    /// Plaintext payload (decrypted for DATA)
    pub payload: Bytes,
    pub checksum: u16,
    pub freshness: u64,
    pub mac: Vec<u8>,
    /// IV recovered from an encrypted DATA payload
    pub iv: Option<[u8; IV_LEN]>,
    /// Size of the payload as carried on the wire
    pub wire_len: usize,
}

impl Packet {
    /// Zero-length DATA packet closing a message.
    pub fn is_terminator(&self) -> bool {
        self.packet_type == PacketType::Data && self.payload.is_empty()
    }
}

/// Keyed encoder/decoder for one connection
#[derive(Debug, Clone)]
pub struct PacketCodec {
    crypto: Crypto,
    mac_len: usize,
    max_payload: usize,
}

impl PacketCodec {
    pub fn new(crypto: Crypto, mac_len: usize, max_payload: usize) -> Self {
        Self {
            crypto,
            mac_len: mac_len.clamp(MIN_MAC_LEN, MAX_MAC_LEN),
            max_payload: max_payload.clamp(1, MAX_PAYLOAD_LIMIT),
        }
    }

    pub fn mac_len(&self) -> usize {
        self.mac_len
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Largest wire payload a peer using this codec can emit.
    pub fn max_wire_payload(&self) -> usize {
        self.max_payload + IV_LEN
    }

    /// Build a complete frame: encrypt, checksum, serialize, authenticate.
    pub fn encode(
        &self,
        seq_num: u16,
        packet_type: PacketType,
        payload: &[u8],
        freshness: u64,
    ) -> Result<Bytes> {
        if payload.len() > self.max_payload {
            return Err(ProtocolError::OversizedPayload(payload.len()));
        }

        let wire_payload = if packet_type == PacketType::Data && !payload.is_empty() {
            let iv = Crypto::generate_iv()?;
            let ciphertext = self.crypto.encrypt(payload, &iv)?;
            let mut wire = Vec::with_capacity(IV_LEN + ciphertext.len());
            wire.extend_from_slice(&iv);
            wire.extend_from_slice(&ciphertext);
            wire
        } else {
            payload.to_vec()
        };

        let header = Header {
            seq_num,
            type_code: packet_type.code(),
            length: wire_payload.len() as u16,
            checksum: checksum::compute(&wire_payload),
            freshness,
            mac_len: self.mac_len as u8,
        };
        let header_bytes = header.to_bytes();
        let mac = self.crypto.sign(&header_bytes, &wire_payload, self.mac_len)?;

        let mut frame = BytesMut::with_capacity(header.frame_len());
        frame.put_slice(&header_bytes);
        frame.put_slice(&mac);
        frame.put_slice(&wire_payload);

        trace!(
            seq_num,
            packet_type = packet_type.name(),
            freshness,
            checksum = header.checksum,
            length = header.length,
            "Packet encoded"
        );
        Ok(frame.freeze())
    }

    /// Validate and open a complete frame.
    ///
    /// Order: header shape, MAC, freshness, checksum, decryption.
    pub fn decode(&self, frame: &[u8], freshness: &FreshnessContext) -> Result<Packet> {
        let header = Header::parse(frame)?;
        let seq = header.seq_num;

        // Declared lengths are authenticated fields: a frame that disagrees
        // with them, or a tag of the wrong width, cannot be authentic.
        if header.mac_len as usize != self.mac_len || header.frame_len() != frame.len() {
            debug!(
                seq,
                mac_len = header.mac_len,
                declared = header.frame_len(),
                actual = frame.len(),
                "Frame shape does not match header"
            );
            return Err(ProtocolError::Authentication { seq });
        }

        let header_bytes = &frame[..HEADER_LEN];
        let mac = &frame[HEADER_LEN..HEADER_LEN + self.mac_len];
        let wire_payload = &frame[HEADER_LEN + self.mac_len..];

        if !self.crypto.verify(header_bytes, wire_payload, mac)? {
            return Err(ProtocolError::Authentication { seq });
        }

        freshness.check(header.freshness, mac)?;

        if !checksum::verify(wire_payload, header.checksum) {
            return Err(ProtocolError::Integrity { seq });
        }

        let packet_type = PacketType::try_from(header.type_code)?;

        let (payload, iv) = match packet_type {
            PacketType::Data if wire_payload.len() > IV_LEN => {
                let (iv_bytes, ciphertext) = wire_payload.split_at(IV_LEN);
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(iv_bytes);
                let plaintext = self.crypto.decrypt(ciphertext, &iv)?;
                (Bytes::from(plaintext), Some(iv))
            }
            PacketType::Data if !wire_payload.is_empty() => {
                return Err(ProtocolError::Format(format!(
                    "{}: {} bytes",
                    constants::ERR_SHORT_CIPHERTEXT,
                    wire_payload.len()
                )));
            }
            PacketType::Data
            | PacketType::Ack
            | PacketType::Nack
            | PacketType::End
            | PacketType::Done => (Bytes::copy_from_slice(wire_payload), None),
        };

        debug!(
            seq,
            packet_type = packet_type.name(),
            freshness = header.freshness,
            length = header.length,
            "Packet decoded"
        );

        Ok(Packet {
            seq_num: seq,
            packet_type,
            payload,
            checksum: header.checksum,
            freshness: header.freshness,
            mac: mac.to_vec(),
            iv,
            wire_len: wire_payload.len(),
        })
    }
}
