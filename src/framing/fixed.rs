//! Fixed-size framing.

use bytes::{Bytes, BytesMut};

use super::{FramingError, MessageFramer};

const DEFAULT_FRAME_LEN: usize = 4;

/// Framer whose frames are all exactly `frame_len` bytes long.
#[derive(Debug)]
pub struct FixedSizeFramer {
    buffer: BytesMut,
    frame_len: usize,
}

impl FixedSizeFramer {
    /// A zero `frame_len` is treated as 1.
    pub fn new(frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            frame_len: frame_len.max(1),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

impl Default for FixedSizeFramer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_LEN)
    }
}

impl MessageFramer for FixedSizeFramer {
    type Message = Bytes;

    fn unframe(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(data);
        while self.buffer.len() >= self.frame_len {
            out.push(self.buffer.split_to(self.frame_len).freeze());
        }
        Ok(())
    }

    fn frame(&mut self, message: &Bytes) -> Result<Bytes, FramingError> {
        if message.len() != self.frame_len {
            return Err(FramingError::Encode(format!(
                "expected {} bytes, got {}",
                self.frame_len,
                message.len()
            )));
        }
        Ok(message.clone())
    }

    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
