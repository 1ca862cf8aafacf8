//! Multiplexed RPC over a single connection.
//!
//! [`DispatcherHandle`] sends [`RpcRequest`]s over one transport and pairs
//! each response frame with its caller by correlation id, so responses may
//! arrive in any order. [`ExpiringService`] bounds calls by a deadline.
//! Both implement [`RpcService`].

mod dispatcher;
mod expiring;
mod message;
mod service;

pub use dispatcher::{DispatchError, DispatcherHandle, PendingResponse};
pub use expiring::{DEFAULT_DEADLINE, ExpiringService};
pub use message::{
    BODY_LENGTH_OFFSET,
    DEFAULT_MAX_FRAME_LENGTH,
    FLAG_REQUEST,
    FLAG_TWO_WAY,
    HEADER_LEN,
    MAGIC,
    PROTOCOL_VERSION,
    RequestEncoder,
    RpcCodecError,
    RpcRequest,
    RpcResponse,
    SERIALIZATION_JSON,
    STATUS_OK,
    correlation_id,
    frame_config,
};
pub use service::RpcService;
