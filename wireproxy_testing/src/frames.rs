//! Raw RPC frames for tests that bypass the dispatcher.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;
use wireproxy::rpc::{RequestEncoder, RpcRequest, RpcResponse};

/// Payload the [`RpcTestServer`](crate::RpcTestServer) answers call `id` with.
#[must_use]
pub fn response_payload(id: u64) -> Bytes { Bytes::from(format!("reply-{id}")) }

/// Encode `request` with correlation id `id`.
///
/// # Panics
///
/// Panics if the request body cannot be serialised.
#[must_use]
pub fn request_frame(id: u64, request: RpcRequest) -> BytesMut {
    let mut buf = BytesMut::new();
    RequestEncoder
        .encode(request.with_id(id), &mut buf)
        .expect("encode request");
    buf
}

/// Encode a successful response to call `id` carrying `payload`.
///
/// # Panics
///
/// Panics if the payload does not fit the length field.
#[must_use]
pub fn response_frame(id: u64, payload: impl Into<Bytes>) -> BytesMut {
    let mut buf = BytesMut::new();
    RpcResponse::new(id, payload)
        .encode(&mut buf)
        .expect("encode response");
    buf
}
