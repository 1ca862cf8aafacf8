//! Command line interface for the `wireproxy` binary.
//!
//! Every option maps onto a field of the immutable proxy configuration built
//! at start-up.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `wireproxy` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wireproxy",
    version,
    about = "TCP reverse proxy forwarding every frontend connection to one backend"
)]
pub struct Cli {
    /// Address to accept frontend connections on.
    #[arg(short, long, default_value = "0.0.0.0:30000")]
    pub listen: SocketAddr,

    /// Backend host name or address.
    #[arg(long, default_value = "127.0.0.1")]
    pub backend_host: String,

    /// Backend port.
    #[arg(long, default_value_t = 20880)]
    pub backend_port: u16,

    /// I/O worker threads, also the number of accept loops.
    #[arg(short, long, default_value_t = 2)]
    pub workers: usize,

    /// Abandon backend dials that take longer than this many milliseconds.
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_listen: Option<SocketAddr>,
}
