//! Bidirectional forwarding between a frontend and a lazily dialed backend.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, split},
    select,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use super::{
    connector::{Connector, ProxyStream},
    state::{PipeAction, PipeEvent, PipeState, Side},
};
use crate::metrics;

const READ_BUFFER_CAPACITY: usize = 16 * 1024;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Errors terminating a [`ConnectionPipe`].
#[derive(Debug, Error)]
pub enum PipeError {
    /// Dialing the backend failed.
    #[error("failed to connect to backend {target}: {source}")]
    Connect {
        /// Backend the pipe tried to reach.
        target: String,
        /// Underlying dial error.
        #[source]
        source: io::Error,
    },

    /// Dialing the backend did not complete within the configured limit.
    #[error("timed out after {timeout:?} connecting to backend {target}")]
    ConnectTimeout {
        /// Backend the pipe tried to reach.
        target: String,
        /// Configured dial limit.
        timeout: Duration,
    },

    /// Reading from or writing to one side failed while forwarding.
    #[error("{side} transport error: {source}")]
    Transport {
        /// Side whose I/O failed.
        side: Side,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Summary of a pipe that closed after an end of input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeReport {
    /// Identifier assigned to the pipe when it was created.
    pub id: u64,
    /// Bytes copied from the frontend to the backend.
    pub to_backend: u64,
    /// Bytes copied from the backend to the frontend.
    pub to_frontend: u64,
    /// Side whose end of input closed the pipe.
    pub closed_by: Side,
}

/// A proxied connection: one frontend stream and, once dialed, one backend.
///
/// The frontend is not polled while the backend dial is in progress, so no
/// client bytes are read before there is somewhere to send them. The backend
/// is dialed exactly once; a failed dial closes the frontend without
/// forwarding anything.
///
/// There is no half-close. The first end of input from either side shuts
/// both sides down, so backend bytes still in flight when a client shuts
/// down its write side are not delivered to it.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use tokio::net::TcpListener;
/// use wireproxy::proxy::{ConnectionPipe, TcpConnector};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = TcpListener::bind("127.0.0.1:3000").await?;
/// let connector = Arc::new(TcpConnector::new("127.0.0.1", 8080));
/// let (client, peer) = listener.accept().await?;
/// let report = ConnectionPipe::new(client, connector)
///     .peer_addr(Some(peer))
///     .run()
///     .await?;
/// println!("forwarded {} bytes upstream", report.to_backend);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPipe<F, C> {
    id: u64,
    frontend: F,
    connector: Arc<C>,
    connect_timeout: Option<Duration>,
    peer_addr: Option<SocketAddr>,
    state: PipeState,
}

impl<F, C> ConnectionPipe<F, C>
where
    F: ProxyStream,
    C: Connector,
{
    /// Create an idle pipe for an accepted `frontend` stream.
    pub fn new(frontend: F, connector: Arc<C>) -> Self {
        Self {
            id: NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed),
            frontend,
            connector,
            connect_timeout: None,
            peer_addr: None,
            state: PipeState::Idle,
        }
    }

    /// Bound the backend dial; `None` waits for the connector indefinitely.
    #[must_use]
    pub fn connect_timeout(mut self, limit: Option<Duration>) -> Self {
        self.connect_timeout = limit;
        self
    }

    /// Record the client address for diagnostics.
    #[must_use]
    pub fn peer_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.peer_addr = addr;
        self
    }

    /// Identifier used in this pipe's log events.
    #[must_use]
    pub const fn id(&self) -> u64 { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PipeState { self.state }

    fn apply(&mut self, event: PipeEvent) -> PipeAction {
        let (next, action) = self.state.on_event(event);
        debug!(
            pipe = self.id,
            from = ?self.state,
            to = ?next,
            ?event,
            "pipe transition"
        );
        self.state = next;
        action
    }

    /// Dial the backend and forward bytes until either side closes.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::Connect`] or [`PipeError::ConnectTimeout`] when the
    /// backend cannot be reached, and [`PipeError::Transport`] when I/O on
    /// either side fails while forwarding. Transport errors are not retried.
    pub async fn run(mut self) -> Result<PipeReport, PipeError> {
        let _active = ActivePipe::register();
        self.drive().await
    }

    async fn drive(&mut self) -> Result<PipeReport, PipeError> {
        self.apply(PipeEvent::FrontendActive);

        let target = self.connector.target();
        info!(pipe = self.id, peer = ?self.peer_addr, %target, "dialing backend");
        let backend = match dial(self.connector.as_ref(), self.connect_timeout, &target).await {
            Ok(backend) => backend,
            Err(err) => {
                metrics::inc_connect_failures();
                error!(pipe = self.id, peer = ?self.peer_addr, error = %err, "backend connect failed");
                if self.apply(PipeEvent::ConnectFailed) == PipeAction::CloseFrontend
                    && let Err(e) = self.frontend.shutdown().await
                {
                    debug!(pipe = self.id, error = %e, "frontend shutdown after dial failure");
                }
                return Err(err);
            }
        };
        self.apply(PipeEvent::ConnectSucceeded);
        self.forward(backend).await
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn forward(&mut self, backend: C::Stream) -> Result<PipeReport, PipeError> {
        let (mut front_rd, mut front_wr) = split(&mut self.frontend);
        let (mut back_rd, mut back_wr) = split(backend);
        let mut to_backend = 0_u64;
        let mut to_frontend = 0_u64;

        let outcome = select! {
            res = copy_half(Side::Frontend, &mut front_rd, &mut back_wr, &mut to_backend) => {
                res.map(|()| Side::Frontend)
            }
            res = copy_half(Side::Backend, &mut back_rd, &mut front_wr, &mut to_frontend) => {
                res.map(|()| Side::Backend)
            }
        };

        let closed_by = match outcome {
            Ok(side) => side,
            Err((side, source)) => {
                self.state = self.state.on_event(PipeEvent::TransportError(side)).0;
                let err = PipeError::Transport { side, source };
                error!(pipe = self.id, peer = ?self.peer_addr, error = %err, "pipe transport error");
                return Err(err);
            }
        };

        let (next, action) = self.state.on_event(PipeEvent::EndOfInput(closed_by));
        self.state = next;
        match action {
            PipeAction::DrainAndClose { eof: Side::Frontend } => {
                shutdown_writer(self.id, Side::Backend, &mut back_wr).await;
                shutdown_writer(self.id, Side::Frontend, &mut front_wr).await;
            }
            PipeAction::DrainAndClose { eof: Side::Backend } => {
                shutdown_writer(self.id, Side::Frontend, &mut front_wr).await;
                shutdown_writer(self.id, Side::Backend, &mut back_wr).await;
            }
            _ => {}
        }
        self.state = self.state.on_event(PipeEvent::ShutdownComplete).0;

        let report = PipeReport {
            id: self.id,
            to_backend,
            to_frontend,
            closed_by,
        };
        info!(
            pipe = report.id,
            peer = ?self.peer_addr,
            to_backend,
            to_frontend,
            %closed_by,
            "pipe closed"
        );
        Ok(report)
    }
}

/// Holds one unit of the active pipes gauge; released on drop, including
/// unwinding.
struct ActivePipe;

impl ActivePipe {
    fn register() -> Self {
        metrics::inc_pipes();
        Self
    }
}

impl Drop for ActivePipe {
    fn drop(&mut self) { metrics::dec_pipes(); }
}

async fn dial<C: Connector>(
    connector: &C,
    limit: Option<Duration>,
    target: &str,
) -> Result<C::Stream, PipeError> {
    let connect = connector.connect();
    let dialed = match limit {
        Some(limit) => timeout(limit, connect)
            .await
            .map_err(|_| PipeError::ConnectTimeout {
                target: target.to_owned(),
                timeout: limit,
            })?,
        None => connect.await,
    };
    dialed.map_err(|source| PipeError::Connect {
        target: target.to_owned(),
        source,
    })
}

/// Copy `from`'s input to the opposite side until end of input.
///
/// Each direction runs as its own future so a blocked write never stops the
/// other direction from reading.
async fn copy_half<R, W>(
    from: Side,
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
) -> Result<(), (Side, io::Error)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    loop {
        let n = reader.read_buf(&mut buf).await.map_err(|e| (from, e))?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf).await.map_err(|e| (from.other(), e))?;
        buf.clear();
        *copied += n as u64;
        metrics::add_forwarded(from.other(), n as u64);
    }
}

async fn shutdown_writer<W>(id: u64, side: Side, writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = writer.flush().await {
        warn!(pipe = id, %side, error = %e, "flush before close failed");
    }
    if let Err(e) = writer.shutdown().await {
        debug!(pipe = id, %side, error = %e, "shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
        sync::oneshot,
        time::timeout,
    };

    use super::*;

    /// Connector handing out one pre-built in-memory backend.
    struct DuplexConnector {
        backend: Mutex<Option<DuplexStream>>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl DuplexConnector {
        fn new(backend: DuplexStream) -> Self {
            Self {
                backend: Mutex::new(Some(backend)),
                gate: Mutex::new(None),
            }
        }

        fn gated(backend: DuplexStream, gate: oneshot::Receiver<()>) -> Self {
            Self {
                backend: Mutex::new(Some(backend)),
                gate: Mutex::new(Some(gate)),
            }
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            let gate = self.gate.lock().expect("gate lock").take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.backend
                .lock()
                .expect("backend lock")
                .take()
                .ok_or_else(|| io::Error::other("backend already taken"))
        }

        fn target(&self) -> String { "in-memory".to_owned() }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }

        fn target(&self) -> String { "refused".to_owned() }
    }

    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> { std::future::pending().await }

        fn target(&self) -> String { "stalled".to_owned() }
    }

    #[tokio::test]
    async fn forwards_both_directions_until_frontend_eof() {
        let (mut client, frontend) = duplex(1024);
        let (backend, mut upstream) = duplex(1024);
        let pipe = ConnectionPipe::new(frontend, Arc::new(DuplexConnector::new(backend)));
        let task = tokio::spawn(pipe.run());

        client.write_all(b"ping").await.expect("client write");
        let mut buf = [0_u8; 4];
        upstream.read_exact(&mut buf).await.expect("upstream read");
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.expect("upstream write");
        let mut buf = [0_u8; 5];
        client.read_exact(&mut buf).await.expect("client read");
        assert_eq!(&buf, b"pong!");

        client.shutdown().await.expect("client shutdown");
        let mut rest = Vec::new();
        upstream.read_to_end(&mut rest).await.expect("upstream eof");
        assert!(rest.is_empty());

        let report = task.await.expect("join").expect("pipe report");
        assert_eq!(report.to_backend, 4);
        assert_eq!(report.to_frontend, 5);
        assert_eq!(report.closed_by, Side::Frontend);
    }

    #[tokio::test]
    async fn backend_eof_closes_frontend() {
        let (mut client, frontend) = duplex(1024);
        let (backend, mut upstream) = duplex(1024);
        let pipe = ConnectionPipe::new(frontend, Arc::new(DuplexConnector::new(backend)));
        let task = tokio::spawn(pipe.run());

        upstream.write_all(b"bye").await.expect("upstream write");
        upstream.shutdown().await.expect("upstream shutdown");

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.expect("client eof");
        assert_eq!(received, b"bye");

        let report = task.await.expect("join").expect("pipe report");
        assert_eq!(report.closed_by, Side::Backend);
        assert_eq!(report.to_frontend, 3);
    }

    #[tokio::test]
    async fn bytes_sent_while_dialing_are_delivered_after_connect() {
        let (mut client, frontend) = duplex(1024);
        let (backend, mut upstream) = duplex(1024);
        let (release, gate) = oneshot::channel();
        let connector = Arc::new(DuplexConnector::gated(backend, gate));
        let task = tokio::spawn(ConnectionPipe::new(frontend, connector).run());

        client.write_all(b"early").await.expect("client write");
        upstream.write_all(b"hello").await.expect("upstream write");
        let mut byte = [0_u8; 1];
        assert!(
            timeout(Duration::from_millis(50), client.read(&mut byte)).await.is_err(),
            "frontend must stay silent until the dial completes"
        );
        release.send(()).expect("release dial");

        let mut buf = [0_u8; 5];
        upstream.read_exact(&mut buf).await.expect("upstream read");
        assert_eq!(&buf, b"early");
        client.read_exact(&mut buf).await.expect("client read");
        assert_eq!(&buf, b"hello");

        drop(client);
        let report = task.await.expect("join").expect("pipe report");
        assert_eq!(report.to_backend, 5);
        assert_eq!(report.to_frontend, 5);
    }

    #[tokio::test]
    async fn full_duplex_echo_outgrows_the_transport_buffers() {
        const TOTAL: usize = 1024 * 1024;
        let (client, frontend) = duplex(64);
        let (backend, upstream) = duplex(64);
        let task = tokio::spawn(
            ConnectionPipe::new(frontend, Arc::new(DuplexConnector::new(backend))).run(),
        );
        tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(upstream);
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });

        let sent: Vec<u8> = (0..=250_u8).cycle().take(TOTAL).collect();
        let (mut rd, mut wr) = tokio::io::split(client);
        let mut echoed = vec![0_u8; TOTAL];
        let (written, read) = timeout(Duration::from_secs(10), async {
            tokio::join!(wr.write_all(&sent), rd.read_exact(&mut echoed))
        })
        .await
        .expect("echo must not stall");
        written.expect("client write");
        read.expect("client read");
        assert!(echoed == sent, "echo must match what was sent");

        drop((rd, wr));
        let report = task.await.expect("join").expect("pipe report");
        assert_eq!(report.to_backend, TOTAL as u64);
        assert_eq!(report.to_frontend, TOTAL as u64);
    }

    #[tokio::test]
    async fn failed_dial_closes_frontend_without_forwarding() {
        let (mut client, frontend) = duplex(1024);
        let pipe = ConnectionPipe::new(frontend, Arc::new(RefusingConnector));

        let err = pipe.run().await.expect_err("dial should fail");
        assert!(matches!(err, PipeError::Connect { ref target, .. } if target == "refused"));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.expect("client eof");
        assert!(received.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dial_is_bounded_by_connect_timeout() {
        let (_client, frontend) = duplex(64);
        let pipe = ConnectionPipe::new(frontend, Arc::new(StalledConnector))
            .connect_timeout(Some(Duration::from_millis(250)));

        let err = pipe.run().await.expect_err("dial should time out");
        assert!(matches!(
            err,
            PipeError::ConnectTimeout { timeout, .. } if timeout == Duration::from_millis(250)
        ));
    }

    #[tokio::test]
    async fn pipe_ids_are_unique() {
        let (_a, first) = duplex(8);
        let (_b, second) = duplex(8);
        let one = ConnectionPipe::new(first, Arc::new(RefusingConnector));
        let two = ConnectionPipe::new(second, Arc::new(RefusingConnector));
        assert_ne!(one.id(), two.id());
        assert_eq!(one.state(), PipeState::Idle);
    }
}
