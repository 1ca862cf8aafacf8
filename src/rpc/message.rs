//! RPC request and response framing.
//!
//! Every message starts with a 16 byte header:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | magic `0xDABB` |
//! | 2 | 1 | flags: serialization id, two-way and request bits |
//! | 3 | 1 | status (responses only; `20` is OK) |
//! | 4 | 8 | correlation id, big-endian |
//! | 12 | 4 | body length, big-endian |
//!
//! A request body is a sequence of newline terminated JSON values: the
//! protocol version, interface name, service version (`null`), method name,
//! parameter type descriptor, parameter and the attachment map. A response
//! body is the raw result payload.

use std::{collections::BTreeMap, io};

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;
use tokio_util::codec::Encoder;

use crate::{
    byte_order::{read_network_u16, read_network_u64, write_network_u16, write_network_u32, write_network_u64},
    codec::{ConfigError, LengthFieldConfig},
};

/// Magic number opening every header.
pub const MAGIC: u16 = 0xdabb;
/// Size of the fixed header.
pub const HEADER_LEN: usize = 16;
/// Offset of the body length field within the header.
pub const BODY_LENGTH_OFFSET: usize = 12;
/// Flag bit marking a request.
pub const FLAG_REQUEST: u8 = 0x80;
/// Flag bit marking a call that expects a response.
pub const FLAG_TWO_WAY: u8 = 0x40;
/// Serialization id for JSON bodies.
pub const SERIALIZATION_JSON: u8 = 0x06;
/// Response status signalling success.
pub const STATUS_OK: u8 = 20;
/// Protocol version written as the first body field.
pub const PROTOCOL_VERSION: &str = "2.0.1";
/// Default largest accepted response frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 4096;

/// Errors raised while encoding requests or decoding response frames.
#[derive(Debug, Error)]
pub enum RpcCodecError {
    /// The request reached the encoder without a correlation id.
    #[error("request has no correlation id")]
    MissingCorrelationId,

    /// The encoded body does not fit the four byte length field.
    #[error("request body of {0} bytes exceeds the length field")]
    BodyTooLarge(usize),

    /// A body field could not be serialised.
    #[error("failed to serialise request body: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame is shorter than the fixed header.
    #[error("frame of {0} bytes is shorter than the {HEADER_LEN} byte header")]
    ShortFrame(usize),

    /// A frame does not start with [`MAGIC`].
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),

    /// Writing to the transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Length-field configuration matching the RPC header: the body length sits
/// at offset 12 and the whole frame, header included, is emitted.
///
/// # Errors
///
/// Returns a [`ConfigError`] if `max_frame_length` cannot hold the header's
/// length field.
pub fn frame_config(max_frame_length: usize) -> Result<LengthFieldConfig, ConfigError> {
    LengthFieldConfig::builder()
        .length_field_offset(BODY_LENGTH_OFFSET)
        .length_field_length(4)
        .length_adjustment(0)
        .initial_bytes_to_strip(0)
        .max_frame_length(max_frame_length)
        .build()
}

/// Read the correlation id from a frame header.
///
/// Returns `None` when `frame` is shorter than the header.
#[must_use]
pub fn correlation_id(frame: &[u8]) -> Option<u64> {
    frame
        .get(4..12)
        .and_then(|id| <[u8; 8]>::try_from(id).ok())
        .map(read_network_u64)
}

fn put_header(dst: &mut BytesMut, flags: u8, status: u8, id: u64, body_len: u32) {
    dst.put_slice(&write_network_u16(MAGIC));
    dst.put_u8(flags);
    dst.put_u8(status);
    dst.put_slice(&write_network_u64(id));
    dst.put_slice(&write_network_u32(body_len));
}

const PATH_ATTACHMENT: &str = "path";

/// Attachment map written as the last body field, `path` first.
#[derive(Serialize)]
struct Attachments<'a> {
    path: &'a str,
    #[serde(flatten)]
    extra: &'a BTreeMap<String, String>,
}

/// A call to `method` on `interface`.
///
/// # Examples
///
/// ```
/// use wireproxy::rpc::RpcRequest;
///
/// let request = RpcRequest::new("com.example.HelloService", "hash")
///     .parameter_types("Ljava/lang/String;")
///     .parameter("123456")
///     .with_id(7);
/// assert_eq!(request.id(), Some(7));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcRequest {
    id: Option<u64>,
    interface: String,
    method: String,
    parameter_types: String,
    parameter: String,
    attachments: BTreeMap<String, String>,
}

impl RpcRequest {
    /// Create a request without parameters or a correlation id.
    #[must_use]
    pub fn new(interface: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: None,
            interface: interface.into(),
            method: method.into(),
            parameter_types: String::new(),
            parameter: String::new(),
            attachments: BTreeMap::new(),
        }
    }

    /// Set the parameter type descriptor.
    #[must_use]
    pub fn parameter_types(mut self, descriptor: impl Into<String>) -> Self {
        self.parameter_types = descriptor.into();
        self
    }

    /// Set the parameter payload.
    #[must_use]
    pub fn parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self
    }

    /// Add an attachment. The `path` attachment always carries the interface
    /// name and cannot be overridden.
    #[must_use]
    pub fn attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key != PATH_ATTACHMENT {
            self.attachments.insert(key, value.into());
        }
        self
    }

    /// Use `id` as the correlation id instead of a dispatcher-assigned one.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Correlation id, if one has been set.
    #[must_use]
    pub const fn id(&self) -> Option<u64> { self.id }

    /// Interface name.
    #[must_use]
    pub fn interface(&self) -> &str { &self.interface }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str { &self.method }

    /// Serialise the request body.
    ///
    /// # Errors
    ///
    /// Returns [`RpcCodecError::Json`] if a field cannot be serialised.
    pub fn encode_body(&self) -> Result<Vec<u8>, RpcCodecError> {
        let attachments = Attachments {
            path: &self.interface,
            extra: &self.attachments,
        };
        let fields = [
            serde_json::to_vec(PROTOCOL_VERSION)?,
            serde_json::to_vec(&self.interface)?,
            serde_json::to_vec(&serde_json::Value::Null)?,
            serde_json::to_vec(&self.method)?,
            serde_json::to_vec(&self.parameter_types)?,
            serde_json::to_vec(&self.parameter)?,
            serde_json::to_vec(&attachments)?,
        ];
        let mut body = Vec::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
        for field in fields {
            body.extend_from_slice(&field);
            body.push(b'\n');
        }
        Ok(body)
    }
}

/// Encoder writing [`RpcRequest`]s as header plus body.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestEncoder;

impl Encoder<RpcRequest> for RequestEncoder {
    type Error = RpcCodecError;

    fn encode(&mut self, item: RpcRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let id = item.id.ok_or(RpcCodecError::MissingCorrelationId)?;
        let body = item.encode_body()?;
        let body_len = u32::try_from(body.len()).map_err(|_| RpcCodecError::BodyTooLarge(body.len()))?;
        dst.reserve(HEADER_LEN + body.len());
        put_header(
            dst,
            SERIALIZATION_JSON | FLAG_REQUEST | FLAG_TWO_WAY,
            0,
            id,
            body_len,
        );
        dst.put_slice(&body);
        Ok(())
    }
}

/// A decoded response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcResponse {
    id: u64,
    status: u8,
    payload: Bytes,
}

impl RpcResponse {
    /// Create a successful response for call `id`.
    #[must_use]
    pub fn new(id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            status: STATUS_OK,
            payload: payload.into(),
        }
    }

    /// Replace the status byte.
    #[must_use]
    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    /// Decode a complete frame, header included.
    ///
    /// # Errors
    ///
    /// Returns [`RpcCodecError::ShortFrame`] or [`RpcCodecError::BadMagic`]
    /// when `frame` does not carry a valid header.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::Bytes;
    /// use wireproxy::rpc::RpcResponse;
    ///
    /// let frame = Bytes::from_static(b"\xda\xbb\x06\x14\0\0\0\0\0\0\0\x01\0\0\0\x02ok");
    /// let response = RpcResponse::decode(frame).expect("valid frame");
    /// assert_eq!(response.id(), 1);
    /// assert!(response.is_ok());
    /// assert_eq!(response.payload().as_ref(), b"ok");
    /// ```
    pub fn decode(frame: Bytes) -> Result<Self, RpcCodecError> {
        if frame.len() < HEADER_LEN {
            return Err(RpcCodecError::ShortFrame(frame.len()));
        }
        let magic = frame
            .get(..2)
            .and_then(|m| <[u8; 2]>::try_from(m).ok())
            .map_or(0, read_network_u16);
        if magic != MAGIC {
            return Err(RpcCodecError::BadMagic(magic));
        }
        let id = correlation_id(&frame).ok_or(RpcCodecError::ShortFrame(frame.len()))?;
        Ok(Self {
            id,
            status: frame[3],
            payload: frame.slice(HEADER_LEN..),
        })
    }

    /// Write the response as header plus payload.
    ///
    /// # Errors
    ///
    /// Returns [`RpcCodecError::BodyTooLarge`] if the payload does not fit the
    /// length field.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), RpcCodecError> {
        let body_len = u32::try_from(self.payload.len())
            .map_err(|_| RpcCodecError::BodyTooLarge(self.payload.len()))?;
        dst.reserve(HEADER_LEN + self.payload.len());
        put_header(dst, SERIALIZATION_JSON, self.status, self.id, body_len);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Correlation id of the call this response answers.
    #[must_use]
    pub const fn id(&self) -> u64 { self.id }

    /// Status byte.
    #[must_use]
    pub const fn status(&self) -> u8 { self.status }

    /// Returns `true` when the status is [`STATUS_OK`].
    #[must_use]
    pub const fn is_ok(&self) -> bool { self.status == STATUS_OK }

    /// Result payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes { &self.payload }

    /// Consume the response, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder};

    use super::*;
    use crate::codec::LengthFieldDecoder;

    fn sample_request() -> RpcRequest {
        RpcRequest::new("com.example.HelloService", "hash")
            .parameter_types("Ljava/lang/String;")
            .parameter("123456")
    }

    #[test]
    fn request_header_layout() {
        let mut buf = BytesMut::new();
        RequestEncoder
            .encode(sample_request().with_id(1), &mut buf)
            .expect("encode");
        assert_eq!(&buf[..4], &[0xda, 0xbb, 0xc6, 0x00]);
        assert_eq!(&buf[4..12], &1_u64.to_be_bytes());
        let body_len = u32::from_be_bytes(buf[12..16].try_into().expect("length field"));
        assert_eq!(body_len as usize, buf.len() - HEADER_LEN);
    }

    #[test]
    fn request_body_fields() {
        let body = sample_request()
            .attachment("timeout", "500")
            .encode_body()
            .expect("body");
        let text = String::from_utf8(body).expect("utf8 body");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "\"2.0.1\"",
                "\"com.example.HelloService\"",
                "null",
                "\"hash\"",
                "\"Ljava/lang/String;\"",
                "\"123456\"",
                "{\"path\":\"com.example.HelloService\",\"timeout\":\"500\"}",
            ]
        );
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn path_attachment_cannot_be_overridden() {
        let body = sample_request()
            .attachment("path", "elsewhere")
            .encode_body()
            .expect("body");
        let text = String::from_utf8(body).expect("utf8 body");
        assert!(text.contains("{\"path\":\"com.example.HelloService\"}"));
    }

    #[test]
    fn request_without_id_is_rejected() {
        let mut buf = BytesMut::new();
        let err = RequestEncoder
            .encode(sample_request(), &mut buf)
            .expect_err("missing id");
        assert!(matches!(err, RpcCodecError::MissingCorrelationId));
        assert!(buf.is_empty());
    }

    #[test]
    fn response_survives_the_frame_decoder() {
        let mut wire = BytesMut::new();
        RpcResponse::new(42, Bytes::from_static(b"1\n\"hash\"\n"))
            .encode(&mut wire)
            .expect("encode");
        let mut decoder = LengthFieldDecoder::new(frame_config(DEFAULT_MAX_FRAME_LENGTH).expect("config"));
        let frame = decoder
            .decode(&mut wire)
            .expect("transport")
            .expect("frame")
            .expect("valid frame");
        let response = RpcResponse::decode(frame).expect("response");
        assert_eq!(response.id(), 42);
        assert!(response.is_ok());
        assert_eq!(response.payload().as_ref(), b"1\n\"hash\"\n");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let frame = Bytes::from_static(&[0_u8; HEADER_LEN]);
        assert!(matches!(
            RpcResponse::decode(frame),
            Err(RpcCodecError::BadMagic(0))
        ));
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(matches!(
            RpcResponse::decode(Bytes::from_static(b"\xda\xbb")),
            Err(RpcCodecError::ShortFrame(2))
        ));
    }

    #[test]
    fn error_status_is_preserved() {
        let mut wire = BytesMut::new();
        RpcResponse::new(3, Bytes::new())
            .with_status(70)
            .encode(&mut wire)
            .expect("encode");
        let response = RpcResponse::decode(wire.freeze()).expect("response");
        assert_eq!(response.status(), 70);
        assert!(!response.is_ok());
    }

    #[test]
    fn correlation_id_reads_header() {
        let mut wire = BytesMut::new();
        RequestEncoder
            .encode(sample_request().with_id(u64::MAX - 1), &mut wire)
            .expect("encode");
        assert_eq!(correlation_id(&wire), Some(u64::MAX - 1));
        assert_eq!(correlation_id(&wire[..11]), None);
    }
}
