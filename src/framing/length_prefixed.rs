//! Length-prefixed framing.
//!
//! Each frame is a 4-byte big-endian payload length followed by the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{FramingError, MessageFramer, DEFAULT_MAX_FRAME_LEN};

const HEADER_LEN: usize = 4;

/// Framer for `u32` big-endian length-prefixed payloads.
#[derive(Debug)]
pub struct LengthPrefixedFramer {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl LengthPrefixedFramer {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Reject frames whose payload is larger than `max_frame_len`.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for LengthPrefixedFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageFramer for LengthPrefixedFramer {
    type Message = Bytes;

    fn unframe(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(data);

        while self.buffer.len() >= HEADER_LEN {
            let len = (&self.buffer[..HEADER_LEN]).get_u32() as usize;
            if len > self.max_frame_len {
                return Err(FramingError::FrameTooLarge {
                    len,
                    max: self.max_frame_len,
                });
            }

            let frame_len = HEADER_LEN + len;
            if self.buffer.len() < frame_len {
                self.buffer.reserve(frame_len - self.buffer.len());
                break;
            }

            self.buffer.advance(HEADER_LEN);
            out.push(self.buffer.split_to(len).freeze());
        }

        Ok(())
    }

    fn frame(&mut self, message: &Bytes) -> Result<Bytes, FramingError> {
        if message.len() > self.max_frame_len {
            return Err(FramingError::FrameTooLarge {
                len: message.len(),
                max: self.max_frame_len,
            });
        }

        let mut dst = BytesMut::with_capacity(HEADER_LEN + message.len());
        dst.put_u32(message.len() as u32);
        dst.extend_from_slice(message);
        Ok(dst.freeze())
    }

    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
