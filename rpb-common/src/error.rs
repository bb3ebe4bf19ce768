// error.rs - frame-level errors shared by the client and its test doubles

use thiserror::Error;

/// Errors raised while framing or unframing a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than the five header bytes were available.
    #[error("short frame: {available} of 5 header bytes available")]
    ShortFrame { available: usize },

    /// The length prefix was zero, so not even the code byte is present.
    #[error("frame length prefix is zero")]
    EmptyFrame,

    /// The length prefix exceeds the maximum accepted payload.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The payload did not decode into the expected message.
    #[error("payload decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Result alias for framing operations.
pub type FrameResult<T> = Result<T, FrameError>;
