//! Delimiter-terminated framing (newline by default).

use bytes::{Bytes, BytesMut};

use super::{FramingError, MessageFramer, DEFAULT_MAX_FRAME_LEN};

/// Framer splitting the stream on a single delimiter byte.
///
/// With the default `\n` delimiter a trailing `\r` is stripped as well, so
/// CRLF-terminated peers decode to the same messages.
#[derive(Debug)]
pub struct DelimitedFramer {
    buffer: BytesMut,
    delimiter: u8,
    max_frame_len: usize,
    // bytes of `buffer` already known to hold no delimiter
    scanned: usize,
}

impl DelimitedFramer {
    pub fn new(delimiter: u8) -> Self {
        Self {
            buffer: BytesMut::new(),
            delimiter,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            scanned: 0,
        }
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            ..Self::default()
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

impl Default for DelimitedFramer {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl MessageFramer for DelimitedFramer {
    type Message = Bytes;

    fn unframe(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(data);

        loop {
            let found = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == self.delimiter);

            let Some(offset) = found else {
                self.scanned = self.buffer.len();
                break;
            };

            let end = self.scanned + offset;
            if end > self.max_frame_len {
                return Err(FramingError::FrameTooLarge {
                    len: end,
                    max: self.max_frame_len,
                });
            }

            let mut line = self.buffer.split_to(end + 1);
            line.truncate(end);
            if self.delimiter == b'\n' && line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            self.scanned = 0;
            out.push(line.freeze());
        }

        if self.buffer.len() > self.max_frame_len {
            return Err(FramingError::FrameTooLarge {
                len: self.buffer.len(),
                max: self.max_frame_len,
            });
        }

        Ok(())
    }

    fn frame(&mut self, message: &Bytes) -> Result<Bytes, FramingError> {
        if message.contains(&self.delimiter) {
            return Err(FramingError::Encode(format!(
                "message contains the delimiter byte {:#04x}",
                self.delimiter
            )));
        }

        let mut dst = BytesMut::with_capacity(message.len() + 1);
        dst.extend_from_slice(message);
        dst.extend_from_slice(&[self.delimiter]);
        Ok(dst.freeze())
    }

    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
