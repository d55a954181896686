//! Newline-delimited JSON framing.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{DelimitedFramer, FramingError, MessageFramer};

/// Decodes each non-empty line as a JSON document of type `T`.
pub struct JsonLinesFramer<T> {
    lines: DelimitedFramer,
    scratch: Vec<Bytes>,
    _message: PhantomData<fn() -> T>,
}

impl<T> JsonLinesFramer<T> {
    pub fn new() -> Self {
        Self::from_lines(DelimitedFramer::default())
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self::from_lines(DelimitedFramer::with_max_frame_len(max_frame_len))
    }

    fn from_lines(lines: DelimitedFramer) -> Self {
        Self {
            lines,
            scratch: Vec::new(),
            _message: PhantomData,
        }
    }
}

impl<T> Default for JsonLinesFramer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonLinesFramer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesFramer")
            .field("buffered", &self.lines.buffered_len())
            .finish()
    }
}

impl<T> MessageFramer for JsonLinesFramer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Message = T;

    fn unframe(&mut self, data: &[u8], out: &mut Vec<T>) -> Result<(), FramingError> {
        let split = self.lines.unframe(data, &mut self.scratch);

        for line in self.scratch.drain(..) {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let message =
                serde_json::from_slice(&line).map_err(|e| FramingError::Decode(e.to_string()))?;
            out.push(message);
        }

        split
    }

    fn frame(&mut self, message: &T) -> Result<Bytes, FramingError> {
        let mut encoded =
            serde_json::to_vec(message).map_err(|e| FramingError::Encode(e.to_string()))?;
        encoded.push(b'\n');
        Ok(Bytes::from(encoded))
    }

    fn buffered_len(&self) -> usize {
        self.lines.buffered_len()
    }
}
