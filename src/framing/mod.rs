//! Message framing subsystem.
//!
//! # Data Flow
//! ```text
//! bytes read from a connection
//!     → MessageFramer::unframe (buffers partial frames internally)
//!     → zero or more decoded messages, in stream order
//!
//! outbound message
//!     → MessageFramer::frame
//!     → bytes written to the connection
//! ```
//!
//! # Design Decisions
//! - A framer is stateful and owned by exactly one connection
//! - Framers are produced by a [`FramerFactory`], called once per accepted
//!   connection, so parsing state is never shared between connections
//! - Framing errors are fatal to the connection that produced them

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

pub mod delimited;
pub mod fixed;
pub mod json;
pub mod length_prefixed;

pub use delimited::DelimitedFramer;
pub use fixed::FixedSizeFramer;
pub use json::JsonLinesFramer;
pub use length_prefixed::LengthPrefixedFramer;

/// Default upper bound on a single frame, shared by the bundled framers.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors raised while decoding or encoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// A frame (announced or pending) is larger than the framer accepts.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The bytes of a complete frame could not be turned into a message.
    #[error("malformed frame: {0}")]
    Decode(String),

    /// The message cannot be represented on the wire.
    #[error("cannot encode message: {0}")]
    Encode(String),
}

/// Stateful, per-connection parser and serializer.
///
/// `unframe` is fed every chunk read from the connection, in order. Bytes
/// that do not yet form a complete frame stay buffered inside the framer
/// until later chunks complete them.
pub trait MessageFramer: Send + 'static {
    /// Decoded application message.
    type Message: Send + Sync + 'static;

    /// Consume `data` and append every message it completes to `out`.
    ///
    /// Messages decoded before an error is hit are still appended.
    fn unframe(&mut self, data: &[u8], out: &mut Vec<Self::Message>) -> Result<(), FramingError>;

    /// Serialize one message into its wire representation.
    fn frame(&mut self, message: &Self::Message) -> Result<Bytes, FramingError>;

    /// Number of bytes held back waiting for the rest of a frame.
    fn buffered_len(&self) -> usize;
}

/// Produces a fresh framer for every accepted connection.
pub struct FramerFactory<F> {
    make: Arc<dyn Fn() -> F + Send + Sync>,
}

impl<F: MessageFramer> FramerFactory<F> {
    pub fn new(make: impl Fn() -> F + Send + Sync + 'static) -> Self {
        Self { make: Arc::new(make) }
    }

    /// Build a new, independent framer instance.
    pub fn create(&self) -> F {
        (self.make)()
    }
}

impl<F: MessageFramer + Default> Default for FramerFactory<F> {
    fn default() -> Self {
        Self::new(F::default)
    }
}

impl<F> Clone for FramerFactory<F> {
    fn clone(&self) -> Self {
        Self {
            make: Arc::clone(&self.make),
        }
    }
}

impl<F> fmt::Debug for FramerFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramerFactory")
            .field("framer", &std::any::type_name::<F>())
            .finish()
    }
}
