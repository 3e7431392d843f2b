//! # Frame Codec
//!
//! Tokio codec that cuts a byte stream into admin-protocol frames.
//!
//! A frame starts with a little-endian `u16` holding the total frame size,
//! prefix and tag included. The decoder waits until that many bytes are
//! buffered and then splits them off without copying; the frame it yields
//! still carries its prefix so it can be handed to `ServerPacket::decode`
//! as-is.
//!
//! The encoder accepts already-built frames (see `AdminPacket::encode`) and
//! only checks that the prefix matches the frame length.

use crate::core::packet::{FRAME_HEADER_LEN, MAX_PACKET_SIZE, SIZE_PREFIX_LEN};
use crate::error::ProtocolError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Length-prefixed frame codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < SIZE_PREFIX_LEN {
            return Ok(None);
        }

        let size = u16::from_le_bytes([src[0], src[1]]);
        let frame_len = usize::from(size);
        if frame_len < FRAME_HEADER_LEN {
            return Err(ProtocolError::InvalidFrameLength(size));
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        if frame_len > MAX_PACKET_SIZE {
            warn!(size = frame_len, max = MAX_PACKET_SIZE, "Received frame above documented maximum size");
        }

        Ok(Some(src.split_to(frame_len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // the peer closed in the middle of a frame
            None => {
                src.advance(src.len());
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.len() > usize::from(u16::MAX) {
            return Err(ProtocolError::PacketTooLarge(frame.len()));
        }
        if frame.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::InvalidFrameLength(frame.len() as u16));
        }
        let size = u16::from_le_bytes([frame[0], frame[1]]);
        if usize::from(size) != frame.len() {
            return Err(ProtocolError::InvalidFrameLength(size));
        }

        dst.reserve(frame.len());
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
