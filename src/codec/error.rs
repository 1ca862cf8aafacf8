//! Error types for the codec layer.
//!
//! Decode errors are fatal to the frame being decoded but not to the
//! connection: every variant is raised only after the offending bytes have
//! been discarded deterministically, so the decoder can be invoked again on
//! the remaining buffer.
//!
//! # Error Categories
//!
//! - [`DecodeError`]: framing failures raised by the length-field and line decoders.
//! - [`ConfigError`]: invalid decoder configuration rejected at construction.
//!
//! Each [`DecodeError`] carries a default [`RecoveryPolicy`] accessible via
//! [`DecodeError::default_recovery_policy`].

use std::io;

use thiserror::Error;

use super::recovery::RecoveryPolicy;

/// Framing errors raised while splitting a byte stream into frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The adjusted frame length is shorter than the header that declared it.
    #[error("frame too small: declared length {length} is below header size {header}")]
    FrameTooSmall {
        /// Adjusted frame length computed from the length field.
        length: i128,
        /// Bytes occupied by the length field and everything before it.
        header: usize,
    },

    /// The adjusted frame length exceeds the configured maximum.
    #[error("frame larger than {max}: declared length {length}")]
    FrameTooLarge {
        /// Adjusted frame length computed from the length field.
        length: u64,
        /// Maximum allowed frame length.
        max: usize,
    },

    /// More leading bytes were configured to be stripped than the frame holds.
    #[error("initial bytes to strip ({strip}) larger than frame ({frame})")]
    StripExceedsFrame {
        /// Configured strip count.
        strip: usize,
        /// Length of the frame that was discarded.
        frame: usize,
    },

    /// A line exceeded the configured maximum length.
    #[error("frame length {length} exceeds max {max}")]
    LineTooLong {
        /// Bytes discarded because of the oversized line.
        length: usize,
        /// Maximum allowed line length.
        max: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("premature EOF: {buffered} bytes of an incomplete frame left in buffer")]
    TruncatedFrame {
        /// Bytes left over when the stream closed.
        buffered: usize,
    },
}

impl DecodeError {
    /// Returns the recommended recovery policy for this error.
    ///
    /// | Error | Policy |
    /// |-------|--------|
    /// | `FrameTooSmall` | `Drop` |
    /// | `FrameTooLarge` | `Drop` |
    /// | `StripExceedsFrame` | `Drop` |
    /// | `LineTooLong` | `Drop` |
    /// | `TruncatedFrame` | `Disconnect` |
    ///
    /// # Examples
    ///
    /// ```
    /// use wireproxy::codec::{DecodeError, RecoveryPolicy};
    ///
    /// let err = DecodeError::FrameTooLarge {
    ///     length: 8192,
    ///     max: 4096,
    /// };
    /// assert_eq!(err.default_recovery_policy(), RecoveryPolicy::Drop);
    /// ```
    #[must_use]
    pub fn default_recovery_policy(&self) -> RecoveryPolicy {
        match self {
            Self::FrameTooSmall { .. }
            | Self::FrameTooLarge { .. }
            | Self::StripExceedsFrame { .. }
            | Self::LineTooLong { .. } => RecoveryPolicy::Drop,
            Self::TruncatedFrame { .. } => RecoveryPolicy::Disconnect,
        }
    }

    /// Returns the error category as a string for logging and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::FrameTooSmall { .. } => "frame_too_small",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::StripExceedsFrame { .. } => "strip_exceeds_frame",
            Self::LineTooLong { .. } => "line_too_long",
            Self::TruncatedFrame { .. } => "truncated_frame",
        }
    }
}

impl From<DecodeError> for io::Error {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::TruncatedFrame { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Invalid decoder configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The length field width is not one of 1, 2, 4 or 8 bytes.
    #[error("unsupported length field length {0}; expected 1, 2, 4 or 8")]
    UnsupportedLengthFieldLength(usize),

    /// The maximum frame length must be positive.
    #[error("max frame length must be greater than zero")]
    ZeroMaxFrameLength,

    /// The length field does not fit inside the maximum frame length.
    #[error(
        "length field ends at byte {end} which exceeds max frame length {max_frame_length}"
    )]
    LengthFieldOutOfBounds {
        /// `length_field_offset + length_field_length`.
        end: usize,
        /// Configured maximum frame length.
        max_frame_length: usize,
    },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
