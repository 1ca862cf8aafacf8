//! Length-field based framing.
//!
//! A frame header carries an unsigned length field at a fixed offset. The
//! frame length is derived from that field as
//! `raw + length_adjustment + length_field_offset + length_field_length`,
//! so the adjustment accounts for any bytes between the length field and the
//! body (or for a length field that already counts the header).

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{ConfigError, DecodeError, DecodeResult, MAX_FRAME_LENGTH};
use crate::byte_order::{ByteOrder, IntWidth};

/// Immutable configuration for [`LengthFieldDecoder`].
///
/// The defaults describe a four byte big-endian length prefix that is
/// stripped from the emitted frame.
///
/// # Examples
///
/// ```
/// use wireproxy::codec::LengthFieldConfig;
///
/// let config = LengthFieldConfig::builder()
///     .length_field_offset(12)
///     .length_field_length(4)
///     .initial_bytes_to_strip(0)
///     .max_frame_length(4096)
///     .build()
///     .expect("valid config");
/// assert_eq!(config.header_len(), 16);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthFieldConfig {
    length_field_offset: usize,
    length_field_width: IntWidth,
    length_adjustment: i64,
    initial_bytes_to_strip: usize,
    max_frame_length: usize,
    byte_order: ByteOrder,
}

impl LengthFieldConfig {
    /// Build a configuration from the positional decoder parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `length_field_length` is not 1, 2, 4 or
    /// 8, when `max_frame_length` is zero, or when the length field does not
    /// fit inside `max_frame_length`.
    pub fn new(
        length_field_length: usize,
        max_frame_length: usize,
        length_field_offset: usize,
        length_adjustment: i64,
        initial_bytes_to_strip: usize,
        network_byte_order: bool,
    ) -> Result<Self, ConfigError> {
        LengthFieldConfigBuilder::default()
            .length_field_length(length_field_length)
            .max_frame_length(max_frame_length)
            .length_field_offset(length_field_offset)
            .length_adjustment(length_adjustment)
            .initial_bytes_to_strip(initial_bytes_to_strip)
            .byte_order(ByteOrder::from_network_flag(network_byte_order))
            .build()
    }

    /// Big-endian `u32` length field at `length_field_offset`, frames emitted
    /// with their header. Callers guarantee `length_field_offset + 4` fits
    /// `max_frame_length`.
    pub(crate) const fn whole_frame_u32(length_field_offset: usize, max_frame_length: usize) -> Self {
        Self {
            length_field_offset,
            length_field_width: IntWidth::U32,
            length_adjustment: 0,
            initial_bytes_to_strip: 0,
            max_frame_length,
            byte_order: ByteOrder::BigEndian,
        }
    }

    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> LengthFieldConfigBuilder { LengthFieldConfigBuilder::default() }

    /// Offset of the length field from the start of the frame.
    #[must_use]
    pub const fn length_field_offset(&self) -> usize { self.length_field_offset }

    /// Width of the length field in bytes.
    #[must_use]
    pub const fn length_field_length(&self) -> usize { self.length_field_width.byte_len() }

    /// Signed correction applied to the raw length field value.
    #[must_use]
    pub const fn length_adjustment(&self) -> i64 { self.length_adjustment }

    /// Leading bytes removed from every emitted frame.
    #[must_use]
    pub const fn initial_bytes_to_strip(&self) -> usize { self.initial_bytes_to_strip }

    /// Largest frame the decoder accepts.
    #[must_use]
    pub const fn max_frame_length(&self) -> usize { self.max_frame_length }

    /// Byte order of the length field.
    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder { self.byte_order }

    /// Bytes that must be buffered before the length field can be read.
    #[must_use]
    pub const fn header_len(&self) -> usize {
        self.length_field_offset + self.length_field_width.byte_len()
    }
}

impl Default for LengthFieldConfig {
    fn default() -> Self {
        Self {
            length_field_offset: 0,
            length_field_width: IntWidth::U32,
            length_adjustment: 0,
            initial_bytes_to_strip: 4,
            max_frame_length: MAX_FRAME_LENGTH,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

/// Builder for [`LengthFieldConfig`].
#[derive(Clone, Copy, Debug)]
pub struct LengthFieldConfigBuilder {
    length_field_offset: usize,
    length_field_length: usize,
    length_adjustment: i64,
    initial_bytes_to_strip: usize,
    max_frame_length: usize,
    byte_order: ByteOrder,
}

impl Default for LengthFieldConfigBuilder {
    fn default() -> Self {
        let defaults = LengthFieldConfig::default();
        Self {
            length_field_offset: defaults.length_field_offset,
            length_field_length: defaults.length_field_length(),
            length_adjustment: defaults.length_adjustment,
            initial_bytes_to_strip: defaults.initial_bytes_to_strip,
            max_frame_length: defaults.max_frame_length,
            byte_order: defaults.byte_order,
        }
    }
}

impl LengthFieldConfigBuilder {
    /// Set the offset of the length field.
    #[must_use]
    pub fn length_field_offset(mut self, offset: usize) -> Self {
        self.length_field_offset = offset;
        self
    }

    /// Set the width of the length field (1, 2, 4 or 8 bytes).
    #[must_use]
    pub fn length_field_length(mut self, length: usize) -> Self {
        self.length_field_length = length;
        self
    }

    /// Set the signed adjustment applied to the length field value.
    #[must_use]
    pub fn length_adjustment(mut self, adjustment: i64) -> Self {
        self.length_adjustment = adjustment;
        self
    }

    /// Set how many leading bytes are stripped from each frame.
    #[must_use]
    pub fn initial_bytes_to_strip(mut self, strip: usize) -> Self {
        self.initial_bytes_to_strip = strip;
        self
    }

    /// Set the maximum accepted frame length.
    #[must_use]
    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Set the byte order of the length field.
    #[must_use]
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// See [`LengthFieldConfig::new`].
    pub fn build(self) -> Result<LengthFieldConfig, ConfigError> {
        let width = IntWidth::try_from(self.length_field_length)
            .map_err(|()| ConfigError::UnsupportedLengthFieldLength(self.length_field_length))?;
        if self.max_frame_length == 0 {
            return Err(ConfigError::ZeroMaxFrameLength);
        }
        let end = self.length_field_offset.saturating_add(width.byte_len());
        if end > self.max_frame_length {
            return Err(ConfigError::LengthFieldOutOfBounds {
                end,
                max_frame_length: self.max_frame_length,
            });
        }
        Ok(LengthFieldConfig {
            length_field_offset: self.length_field_offset,
            length_field_width: width,
            length_adjustment: self.length_adjustment,
            initial_bytes_to_strip: self.initial_bytes_to_strip,
            max_frame_length: self.max_frame_length,
            byte_order: self.byte_order,
        })
    }
}

/// Decoder splitting a byte stream on a length field in the frame header.
///
/// The only state carried between calls is the number of bytes still owed
/// to an oversized frame. When a frame declares a length above the maximum
/// and only part of it is buffered, the remainder is skipped as it arrives
/// so the stream resynchronises on the declared frame boundary. The error
/// is reported once, when the oversized header is first seen.
#[derive(Clone, Debug)]
pub struct LengthFieldDecoder {
    config: LengthFieldConfig,
    bytes_to_discard: u64,
}

impl LengthFieldDecoder {
    /// Create a decoder for `config`.
    #[must_use]
    pub fn new(config: LengthFieldConfig) -> Self {
        Self {
            config,
            bytes_to_discard: 0,
        }
    }

    /// Return the decoder configuration.
    #[must_use]
    pub const fn config(&self) -> &LengthFieldConfig { &self.config }

    /// Returns `true` while the tail of an oversized frame is being skipped.
    #[must_use]
    pub const fn is_discarding(&self) -> bool { self.bytes_to_discard > 0 }

    /// Decode at most one frame from `src`.
    ///
    /// Returns `Ok(None)` without consuming anything when more bytes are
    /// needed. On error the offending bytes have already been removed from
    /// `src`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the declared length is smaller than the
    /// header, larger than the configured maximum, or smaller than the strip
    /// count.
    pub fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        if self.bytes_to_discard > 0 {
            self.discard_pending(src);
            if self.bytes_to_discard > 0 {
                return Ok(None);
            }
        }

        let header = self.config.header_len();
        if src.len() < header {
            return Ok(None);
        }

        let field = &src[self.config.length_field_offset..header];
        let Some(raw) = self
            .config
            .byte_order
            .read_uint(self.config.length_field_width, field)
        else {
            return Ok(None);
        };

        let frame_length = i128::from(raw)
            + i128::from(self.config.length_adjustment)
            + i128::from(header as u64);

        if frame_length < i128::from(header as u64) {
            src.advance(header);
            return Err(DecodeError::FrameTooSmall {
                length: frame_length,
                header,
            });
        }

        if frame_length > i128::from(self.config.max_frame_length as u64) {
            let declared = u64::try_from(frame_length).unwrap_or(u64::MAX);
            self.bytes_to_discard = declared;
            self.discard_pending(src);
            return Err(DecodeError::FrameTooLarge {
                length: declared,
                max: self.config.max_frame_length,
            });
        }

        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "frame_length lies between header and max_frame_length"
        )]
        let frame_length = frame_length as usize;

        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }

        let strip = self.config.initial_bytes_to_strip;
        if strip > frame_length {
            src.advance(frame_length);
            return Err(DecodeError::StripExceedsFrame {
                strip,
                frame: frame_length,
            });
        }

        src.advance(strip);
        Ok(Some(src.split_to(frame_length - strip).freeze()))
    }

    fn discard_pending(&mut self, src: &mut BytesMut) {
        let skip = usize::try_from(self.bytes_to_discard).map_or(src.len(), |owed| owed.min(src.len()));
        src.advance(skip);
        self.bytes_to_discard -= skip as u64;
    }
}

impl Decoder for LengthFieldDecoder {
    type Item = DecodeResult;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decode_frame(src).transpose())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.is_empty() || self.is_discarding() {
            src.clear();
            self.bytes_to_discard = 0;
            return Ok(None);
        }
        let buffered = src.len();
        src.clear();
        tracing::debug!(buffered, "stream closed mid-frame");
        Ok(Some(Err(DecodeError::TruncatedFrame { buffered })))
    }
}

/// Encoder prefixing each payload with its length.
///
/// The written length is `payload.len() + length_adjustment`, plus the width
/// of the length field itself when `length_includes_length_field` is set.
///
/// # Examples
///
/// ```
/// use bytes::{Bytes, BytesMut};
/// use tokio_util::codec::Encoder;
/// use wireproxy::codec::LengthFieldPrepender;
///
/// let mut prepender = LengthFieldPrepender::new(2).expect("valid width");
/// let mut out = BytesMut::new();
/// prepender
///     .encode(Bytes::from_static(b"ok"), &mut out)
///     .expect("encode");
/// assert_eq!(&out[..], b"\x00\x02ok");
/// ```
#[derive(Clone, Copy, Debug)]
pub struct LengthFieldPrepender {
    width: IntWidth,
    length_adjustment: i64,
    length_includes_length_field: bool,
    byte_order: ByteOrder,
}

impl LengthFieldPrepender {
    /// Create a big-endian prepender writing a `length_field_length` byte
    /// length that counts only the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedLengthFieldLength`] for widths other
    /// than 1, 2, 4 or 8.
    pub fn new(length_field_length: usize) -> Result<Self, ConfigError> {
        let width = IntWidth::try_from(length_field_length)
            .map_err(|()| ConfigError::UnsupportedLengthFieldLength(length_field_length))?;
        Ok(Self {
            width,
            length_adjustment: 0,
            length_includes_length_field: false,
            byte_order: ByteOrder::BigEndian,
        })
    }

    /// Add a signed correction to every written length.
    #[must_use]
    pub fn length_adjustment(mut self, adjustment: i64) -> Self {
        self.length_adjustment = adjustment;
        self
    }

    /// Count the length field itself in the written length.
    #[must_use]
    pub fn length_includes_length_field(mut self, include: bool) -> Self {
        self.length_includes_length_field = include;
        self
    }

    /// Write the length field in `order`.
    #[must_use]
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }
}

impl Default for LengthFieldPrepender {
    fn default() -> Self {
        Self {
            width: IntWidth::U32,
            length_adjustment: 0,
            length_includes_length_field: false,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

impl Encoder<Bytes> for LengthFieldPrepender {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut length = i128::from(item.len() as u64) + i128::from(self.length_adjustment);
        if self.length_includes_length_field {
            length += i128::from(self.width.byte_len() as u64);
        }
        let length = u64::try_from(length).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("adjusted length {length} is negative"),
            )
        })?;

        let mut header = Vec::with_capacity(self.width.byte_len());
        self.byte_order
            .write_uint(length, self.width, &mut header)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "length {length} does not fit in {} byte length field",
                        self.width.byte_len()
                    ),
                )
            })?;

        dst.reserve(header.len() + item.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
