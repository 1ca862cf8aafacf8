//! Line based framing.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use super::{DecodeError, DecodeResult};

/// Line terminators accepted by [`LineDecoder`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Terminator {
    /// Only `\n` ends a line.
    Newline,
    /// Only `\r\n` ends a line.
    CarriageNewline,
    /// Either `\n` or `\r\n` ends a line.
    #[default]
    Both,
}

impl Terminator {
    /// Locate the first terminator in `buf`, returning its offset and width.
    fn find(self, buf: &[u8]) -> Option<(usize, usize)> {
        buf.iter().enumerate().find_map(|(i, &b)| match (self, b) {
            (Self::Newline | Self::Both, b'\n') => Some((i, 1)),
            (Self::CarriageNewline | Self::Both, b'\r') if buf.get(i + 1) == Some(&b'\n') => {
                Some((i, 2))
            }
            _ => None,
        })
    }
}

/// Decoder splitting a byte stream into lines.
///
/// A line longer than `max_length` is discarded up to and including its
/// terminator and reported once as [`DecodeError::LineTooLong`]. When the
/// terminator has not arrived yet the decoder enters a discarding mode that
/// drops bytes silently until the next terminator, after which decoding
/// resumes with the following line.
#[derive(Clone, Debug)]
pub struct LineDecoder {
    max_length: usize,
    strip_delimiter: bool,
    terminator: Terminator,
    discarding: bool,
    discarded_bytes: usize,
}

impl LineDecoder {
    /// Create a decoder accepting lines of at most `max_length` bytes,
    /// excluding the terminator, with the terminator stripped.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            strip_delimiter: true,
            terminator: Terminator::default(),
            discarding: false,
            discarded_bytes: 0,
        }
    }

    /// Keep or strip the terminator on emitted lines.
    #[must_use]
    pub fn strip_delimiter(mut self, strip: bool) -> Self {
        self.strip_delimiter = strip;
        self
    }

    /// Select which terminators end a line.
    #[must_use]
    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Maximum accepted line length.
    #[must_use]
    pub const fn max_length(&self) -> usize { self.max_length }

    /// Returns `true` while bytes of an oversized line are being dropped.
    #[must_use]
    pub const fn is_discarding(&self) -> bool { self.discarding }

    /// Decode at most one line from `src`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::LineTooLong`] after consuming an oversized line
    /// or, for an unterminated one, everything buffered so far.
    pub fn decode_line(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        if self.discarding {
            match self.terminator.find(src) {
                Some((eol, delim)) => {
                    src.advance(eol + delim);
                    tracing::debug!(
                        discarded = self.discarded_bytes + eol + delim,
                        "resynchronised after oversized line"
                    );
                    self.discarding = false;
                    self.discarded_bytes = 0;
                }
                None => {
                    self.discarded_bytes += src.len();
                    src.clear();
                    return Ok(None);
                }
            }
        }

        match self.terminator.find(src) {
            Some((eol, delim)) if eol > self.max_length => {
                src.advance(eol + delim);
                Err(DecodeError::LineTooLong {
                    length: eol,
                    max: self.max_length,
                })
            }
            Some((eol, delim)) => {
                let line = if self.strip_delimiter {
                    let line = src.split_to(eol).freeze();
                    src.advance(delim);
                    line
                } else {
                    src.split_to(eol + delim).freeze()
                };
                Ok(Some(line))
            }
            None if self.pending_len(src) > self.max_length => {
                let length = src.len();
                src.clear();
                self.discarding = true;
                self.discarded_bytes = length;
                Err(DecodeError::LineTooLong {
                    length,
                    max: self.max_length,
                })
            }
            None => Ok(None),
        }
    }

    /// Buffered line bytes, excluding a trailing `\r` that may start a
    /// terminator.
    fn pending_len(&self, src: &[u8]) -> usize {
        match (self.terminator, src.last()) {
            (Terminator::CarriageNewline | Terminator::Both, Some(b'\r')) => src.len() - 1,
            _ => src.len(),
        }
    }
}

impl Decoder for LineDecoder {
    type Item = DecodeResult;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decode_line(src).transpose())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.is_empty() || self.discarding {
            src.clear();
            self.discarding = false;
            self.discarded_bytes = 0;
            return Ok(None);
        }
        let buffered = src.len();
        src.clear();
        Ok(Some(Err(DecodeError::TruncatedFrame { buffered })))
    }
}
