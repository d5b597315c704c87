//! Frames pushed to viewers
//!
//! Segment frame = 29-byte header + payload:
//! - Byte 0: Kind (0x10)
//! - Bytes 1-8: Segment ID (LE)
//! - Bytes 9-16: Capture time, micros since the Unix epoch (LE, signed)
//! - Bytes 17-24: Duration in micros (LE)
//! - Bytes 25-28: Payload length (LE)
//!
//! End frame = 2 bytes: kind (0x11) + disconnect reason.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use rill_core::{CaptureTime, DisconnectReason, RillError, RillResult, Segment, SegmentId};

/// Segment frame header size in bytes
pub const SEGMENT_HEADER_SIZE: usize = 29;

/// End frame size in bytes
pub const END_FRAME_SIZE: usize = 2;

const KIND_SEGMENT: u8 = 0x10;
const KIND_END: u8 = 0x11;

/// Wire code for a disconnect reason
pub fn reason_to_byte(reason: DisconnectReason) -> u8 {
    match reason {
        DisconnectReason::QueueOverflow => 1,
        DisconnectReason::DeliveryTimeout => 2,
        DisconnectReason::Detached => 3,
        DisconnectReason::SessionEnded => 4,
        DisconnectReason::SessionFailed => 5,
    }
}

pub fn reason_from_byte(b: u8) -> Option<DisconnectReason> {
    match b {
        1 => Some(DisconnectReason::QueueOverflow),
        2 => Some(DisconnectReason::DeliveryTimeout),
        3 => Some(DisconnectReason::Detached),
        4 => Some(DisconnectReason::SessionEnded),
        5 => Some(DisconnectReason::SessionFailed),
        _ => None,
    }
}

/// One unit on the viewer stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Segment(Segment),
    /// Last frame of a stream
    End(DisconnectReason),
}

impl Frame {
    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Segment(segment) => SEGMENT_HEADER_SIZE + segment.len(),
            Frame::End(_) => END_FRAME_SIZE,
        }
    }

    /// Append the encoded frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        match self {
            Frame::Segment(segment) => {
                buf.put_u8(KIND_SEGMENT);
                buf.put_u64_le(segment.id().as_u64());
                buf.put_i64_le(segment.captured_at().as_micros());
                buf.put_u64_le(segment.duration().as_micros() as u64);
                buf.put_u32_le(segment.len() as u32);
                buf.put_slice(segment.payload());
            }
            Frame::End(reason) => {
                buf.put_u8(KIND_END);
                buf.put_u8(reason_to_byte(*reason));
            }
        }
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Incremental frame decoder for a viewer stream
///
/// Feed bytes as they arrive and call [`FrameDecoder::decode`] until it
/// returns `Ok(None)`.
#[derive(Debug)]
pub struct FrameDecoder {
    max_payload: usize,
}

impl FrameDecoder {
    /// Decoder refusing payloads over `max_payload` bytes
    pub fn new(max_payload: usize) -> Self {
        FrameDecoder { max_payload }
    }

    /// Take one complete frame off the front of `buf`
    pub fn decode(&self, buf: &mut BytesMut) -> RillResult<Option<Frame>> {
        let Some(&kind) = buf.first() else {
            return Ok(None);
        };

        match kind {
            KIND_SEGMENT => self.decode_segment(buf),
            KIND_END => {
                if buf.len() < END_FRAME_SIZE {
                    return Ok(None);
                }
                let reason = reason_from_byte(buf[1]).ok_or_else(|| {
                    RillError::InvalidWireFormat(format!("Unknown disconnect reason {}", buf[1]))
                })?;
                buf.advance(END_FRAME_SIZE);
                Ok(Some(Frame::End(reason)))
            }
            other => Err(RillError::InvalidWireFormat(format!(
                "Unknown frame kind 0x{:02x}",
                other
            ))),
        }
    }

    fn decode_segment(&self, buf: &mut BytesMut) -> RillResult<Option<Frame>> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &buf[1..SEGMENT_HEADER_SIZE];
        let id = SegmentId::new(header.get_u64_le());
        let captured_at = CaptureTime::from_micros(header.get_i64_le());
        let duration = Duration::from_micros(header.get_u64_le());
        let len = header.get_u32_le() as usize;

        if len > self.max_payload {
            return Err(RillError::InvalidWireFormat(format!(
                "Segment payload {} exceeds limit {}",
                len, self.max_payload
            )));
        }
        if buf.len() < SEGMENT_HEADER_SIZE + len {
            buf.reserve(SEGMENT_HEADER_SIZE + len - buf.len());
            return Ok(None);
        }

        buf.advance(SEGMENT_HEADER_SIZE);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Frame::Segment(Segment::new(
            id,
            payload,
            captured_at,
            duration,
        ))))
    }
}
