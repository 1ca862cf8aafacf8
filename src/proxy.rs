//! Connection-level TCP reverse proxy.
//!
//! [`ProxyServer`] accepts frontend connections and hands each one to a
//! [`ConnectionPipe`], which dials the backend through a [`Connector`] and
//! then copies bytes verbatim in both directions. The pipe lifecycle is the
//! pure state machine in [`PipeState`].

mod accept;
mod backoff;
mod connector;
mod pipe;
mod server;
mod state;

pub use backoff::BackoffConfig;
pub use connector::{Connector, ProxyStream, TcpConnector};
pub use pipe::{ConnectionPipe, PipeError, PipeReport};
pub use server::{Bound, ProxyServer, ServerError, ServerState, Unbound};
pub use state::{PipeAction, PipeEvent, PipeState, Side};
