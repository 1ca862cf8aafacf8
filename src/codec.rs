//! Pluggable framing codecs for proxied byte streams.
//!
//! Decoders split an unbounded, arbitrarily fragmented byte stream into
//! discrete frames. Two strategies are provided:
//!
//! - [`LengthFieldDecoder`]: frames announce their own length in a header field of configurable
//!   offset, width and byte order.
//! - [`LineDecoder`]: frames end at a `\n` or `\r\n` terminator.
//!
//! Both implement [`tokio_util::codec::Decoder`] with
//! `Item = Result<Bytes, DecodeError>`. A decode error is yielded as an item
//! rather than as the decoder's error type, so a framed reader keeps
//! running after a frame has been discarded. The offending bytes are always
//! consumed before the error is reported.
//!
//! [`LengthFieldPrepender`] is the encoder counterpart of the length-field
//! decoder.

use std::io;

use bytes::Bytes;
use tokio_util::codec::Decoder;

pub mod error;
mod length_field;
mod line;
pub mod recovery;

pub use error::{ConfigError, DecodeError};
pub use length_field::{
    LengthFieldConfig,
    LengthFieldConfigBuilder,
    LengthFieldDecoder,
    LengthFieldPrepender,
};
pub use line::{LineDecoder, Terminator};
pub use recovery::RecoveryPolicy;

/// Maximum frame length in bytes (16 MiB) used when none is configured.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Outcome of decoding one frame: the frame bytes or the reason the frame
/// was discarded.
pub type DecodeResult = Result<Bytes, DecodeError>;

/// Trait alias for decoders usable as a framing stage.
///
/// Any decoder reporting discarded frames as items and transport problems as
/// [`io::Error`] qualifies, so the length-field and line strategies can be
/// swapped without touching the consumer.
pub trait FrameDecoder: Decoder<Item = DecodeResult, Error = io::Error> + Send + 'static {}

impl<T> FrameDecoder for T where T: Decoder<Item = DecodeResult, Error = io::Error> + Send + 'static {}
