//! # Frame Layout
//!
//! Purpose: Turn typed messages into length-prefixed frames and back.
//!
//! ## Design Principles
//!
//! 1. **Pure Transformation**: Encoding never fails and never touches the network.
//! 2. **Header First**: Readers buffer exactly five bytes, decode the header, then
//!    read the announced payload. Partial reads are the caller's business.
//! 3. **Single Allocation**: Messages are encoded straight into the frame buffer.
//!
//! ## Memory Layout Example
//!
//! ```text
//! Frame (5 + N bytes total):
//! +-------------+---------+--------------+
//! | length:4B   | code:1B | payload:N B  |
//! | big-endian  |         | protobuf     |
//! +-------------+---------+--------------+
//! length = N + 1 (covers the code byte and the payload)
//!
//! Ping request (5 bytes total):
//! +-------------+---------+
//! | 00 00 00 01 | 01      |
//! +-------------+---------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;

use crate::code::MessageCode;
use crate::error::{FrameError, FrameResult};

/// Size of the fixed frame header: four length bytes plus the code byte.
pub const HEADER_LEN: usize = 5;

/// Largest payload the reader accepts before refusing the frame (512 MiB).
pub const MAX_PAYLOAD_LEN: usize = 512 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw code byte; unknown codes are surfaced to the caller untouched.
    pub code: u8,
    /// Number of payload bytes that follow the header.
    pub payload_len: usize,
}

impl FrameHeader {
    /// Returns the typed code when the byte is a known message code.
    pub fn message_code(&self) -> Option<MessageCode> {
        MessageCode::from_u8(self.code)
    }
}

/// A complete frame: code plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Decodes the payload as the given message type.
    pub fn decode<M: Message + Default>(&self) -> FrameResult<M> {
        decode_payload(&self.payload)
    }
}

/// Encodes a raw payload into a frame.
pub fn encode(code: MessageCode, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    put_header(&mut out, code, payload.len());
    out.put_slice(payload);
    out.freeze()
}

/// Encodes a message into a frame without an intermediate payload buffer.
pub fn encode_message<M: Message>(code: MessageCode, message: &M) -> Bytes {
    let len = message.encoded_len();
    let mut out = BytesMut::with_capacity(HEADER_LEN + len);
    put_header(&mut out, code, len);
    // Capacity was reserved above, so encoding cannot run out of space.
    message.encode_raw(&mut out);
    out.freeze()
}

fn put_header(out: &mut BytesMut, code: MessageCode, payload_len: usize) {
    debug_assert!(payload_len < u32::MAX as usize);
    out.put_u32((payload_len + 1) as u32);
    out.put_u8(code.as_u8());
}

/// Decodes the five header bytes at the front of `buf`.
///
/// Only the header is inspected; the payload does not need to be buffered yet.
pub fn decode_header(buf: &[u8]) -> FrameResult<FrameHeader> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::ShortFrame { available: buf.len() });
    }
    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length == 0 {
        return Err(FrameError::EmptyFrame);
    }
    let payload_len = length - 1;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::FrameTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(FrameHeader {
        code: buf[4],
        payload_len,
    })
}

/// Decodes a complete frame held in `buf`, returning it with the bytes consumed.
///
/// Returns `Ok(None)` when the payload is not fully buffered yet.
pub fn decode_frame(buf: &[u8]) -> FrameResult<Option<(Frame, usize)>> {
    let header = decode_header(buf)?;
    let total = HEADER_LEN + header.payload_len;
    if buf.len() < total {
        return Ok(None);
    }
    let frame = Frame {
        code: header.code,
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..total]),
    };
    Ok(Some((frame, total)))
}

/// Decodes a payload as the given message type.
pub fn decode_payload<M: Message + Default>(payload: &[u8]) -> FrameResult<M> {
    Ok(M::decode(payload)?)
}
