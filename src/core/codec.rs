use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::core::packet::{Header, HEADER_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::MAX_MAC_LEN;

/// Cuts complete raw frames out of a byte stream.
///
/// Frames are returned still sealed; [`PacketCodec`](crate::core::packet::PacketCodec)
/// authenticates and opens them. Header lengths are bounded here so a hostile
/// peer cannot make the reader reserve more than one legitimate frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_wire_payload: usize,
}

impl FrameCodec {
    pub fn new(max_wire_payload: usize) -> Self {
        Self { max_wire_payload }
    }

    pub fn max_frame_len(&self) -> usize {
        HEADER_LEN + MAX_MAC_LEN + self.max_wire_payload
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = Header::parse(&src[..HEADER_LEN])?;
        if header.mac_len as usize > MAX_MAC_LEN || header.length as usize > self.max_wire_payload
        {
            return Err(ProtocolError::Format(format!(
                "{}: mac_len {}, length {}",
                constants::ERR_OVERSIZED_FRAME,
                header.mac_len,
                header.length
            )));
        }

        let frame_len = header.frame_len();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        trace!(seq = header.seq_num, frame_len, "Frame complete");
        Ok(Some(src.split_to(frame_len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                // Peer went away mid-frame.
                src.advance(src.len());
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(frame.len());
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
