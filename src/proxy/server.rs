//! Listener binding and the worker accept loops.

use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use futures::Future;
use log::warn;
use thiserror::Error;
use tokio::{net::TcpListener, select, signal, sync::oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    accept::{AcceptLoopOptions, accept_loop},
    backoff::BackoffConfig,
    connector::{Connector, TcpConnector},
};
use crate::config::{DEFAULT_WORKERS, ProxyConfig};

/// Errors that may occur while setting up or running the proxy server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

/// TCP reverse proxy accepting frontend connections and piping each one to a
/// backend obtained from a [`Connector`].
///
/// `workers` accept loops share one listener; each accepted connection runs
/// as its own [`ConnectionPipe`](super::ConnectionPipe) task.
///
/// # Examples
///
/// ```no_run
/// use wireproxy::proxy::{ProxyServer, TcpConnector};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), wireproxy::proxy::ServerError> {
/// ProxyServer::new(TcpConnector::new("127.0.0.1", 20880))
///     .workers(2)
///     .bind("127.0.0.1:3000".parse().expect("addr"))?
///     .run()
///     .await
/// # }
/// ```
pub struct ProxyServer<C = TcpConnector, S = Unbound>
where
    C: Connector,
    S: ServerState,
{
    connector: Arc<C>,
    workers: usize,
    backoff: BackoffConfig,
    connect_timeout: Option<Duration>,
    ready_tx: Option<oneshot::Sender<()>>,
    state: S,
}

impl ProxyServer<TcpConnector, Unbound> {
    /// Build an unbound server from `config`: a TCP connector for the
    /// configured backend plus the configured workers and dial timeout.
    #[must_use]
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(TcpConnector::new(config.backend_host(), config.backend_port()))
            .workers(config.workers())
            .connect_timeout(config.connect_timeout())
    }
}

impl<C: Connector> ProxyServer<C, Unbound> {
    /// Create an unbound server dialing backends through `connector`.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            workers: DEFAULT_WORKERS,
            backoff: BackoffConfig::default(),
            connect_timeout: None,
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Return `None` as the server is not bound.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding or configuring the listener
    /// fails.
    pub fn bind(self, addr: SocketAddr) -> Result<ProxyServer<C, Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an already open listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be registered with
    /// the runtime.
    pub fn bind_existing_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<ProxyServer<C, Bound>, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        let ProxyServer {
            connector,
            workers,
            backoff,
            connect_timeout,
            ready_tx,
            ..
        } = self;
        Ok(ProxyServer {
            connector,
            workers,
            backoff,
            connect_timeout,
            ready_tx,
            state: Bound {
                listener: Arc::new(listener),
            },
        })
    }
}

impl<C: Connector, S: ServerState> ProxyServer<C, S> {
    /// Set the number of accept loops; values below one are raised to one.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Configure accept-failure back-off.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bound every backend dial by `limit`.
    #[must_use]
    pub fn connect_timeout(mut self, limit: Option<Duration>) -> Self {
        self.connect_timeout = limit;
        self
    }

    /// Notify `tx` once every accept loop has been spawned.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Configured number of accept loops.
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.workers }

    /// Connector shared by every pipe.
    #[must_use]
    pub fn connector(&self) -> &C { &self.connector }
}

impl<C: Connector> ProxyServer<C, Bound> {
    /// Returns the bound address, or `None` if retrieving it fails.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }

    /// Run until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and never
    /// surface; the `Result` is kept for start-up failures.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves, then wait for in-flight pipes.
    ///
    /// # Errors
    ///
    /// See [`ProxyServer::run`].
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let ProxyServer {
            connector,
            workers,
            backoff,
            connect_timeout,
            ready_tx,
            state: Bound { listener },
        } = self;
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                Arc::clone(&connector),
                AcceptLoopOptions {
                    shutdown: token.clone(),
                    tracker: tracker.clone(),
                    backoff,
                    connect_timeout,
                },
            ));
        }
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            target = %connector.target(),
            workers,
            "proxy listening"
        );

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("proxy stopped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
