//! Plain TCP backends for proxy tests.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
};

use rstest::fixture;
use tokio::net::TcpListener;

/// Create a TCP listener bound to a free local port.
///
/// # Panics
///
/// Panics if no ephemeral localhost port can be bound.
#[fixture]
pub fn unused_listener() -> StdTcpListener {
    StdTcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .expect("failed to bind free port listener")
}

/// Spawn a backend that echoes every byte until the peer closes its write
/// side, then closes its own.
///
/// # Errors
///
/// Returns any IO error encountered while binding the listener.
pub async fn spawn_echo_backend() -> io::Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    Ok(addr)
}

/// Address of a localhost port that was free a moment ago and is now closed.
///
/// # Errors
///
/// Returns any IO error encountered while binding the temporary listener.
pub fn closed_port_addr() -> io::Result<SocketAddr> {
    let listener = StdTcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
    listener.local_addr()
}
