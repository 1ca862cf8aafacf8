#![doc(html_root_url = "https://docs.rs/wireproxy/latest")]
//! Public API for the `wireproxy` library.
//!
//! This crate provides a connection-level TCP reverse proxy together with
//! the framing and correlation layers needed to speak a length-prefixed RPC
//! protocol over a single multiplexed connection.
//!
//! - [`codec`]: length-field and line based frame decoders.
//! - [`proxy`]: the accept loop, per-connection pipe and its state machine.
//! - [`rpc`]: request encoding and the response dispatcher.

pub mod byte_order;
pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod panic;
pub mod proxy;
pub mod rpc;

pub use config::{ProxyConfig, RpcClientConfig};
pub use error::{Error, Result};
pub use proxy::{ConnectionPipe, ProxyServer};
pub use rpc::{DispatchError, DispatcherHandle, RpcRequest, RpcResponse, RpcService};
