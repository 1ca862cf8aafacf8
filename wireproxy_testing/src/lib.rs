//! Utilities for exercising `wireproxy` against real sockets in tests.
//!
//! - [`spawn_echo_backend`] starts a TCP backend that echoes every byte.
//! - [`closed_port_addr`] yields an address nothing listens on.
//! - [`RpcTestServer`] answers RPC requests according to a [`ServerMode`].
//!
//! ```rust,no_run
//! use wireproxy_testing::{RpcTestServer, ServerMode};
//!
//! # async fn example() -> std::io::Result<()> {
//! let server = RpcTestServer::spawn(ServerMode::Reverse(3)).await?;
//! let connector = server.connector();
//! # let _ = connector;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod frames;
pub mod rpc_server;

pub use backend::{closed_port_addr, spawn_echo_backend, unused_listener};
pub use frames::{request_frame, response_frame, response_payload};
pub use rpc_server::{RpcTestServer, ServerMode, process_request};

/// Result alias for fallible tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
