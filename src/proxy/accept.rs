//! Accept loop feeding accepted connections into pipe tasks.

use std::{io, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use log::{error, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    backoff::BackoffConfig,
    connector::{Connector, ProxyStream},
    pipe::ConnectionPipe,
};
use crate::{metrics, panic::format_panic};

/// Source of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::proxy) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

#[derive(Clone, Debug)]
pub(in crate::proxy) struct AcceptLoopOptions {
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
    pub connect_timeout: Option<Duration>,
}

/// Accept connections from `listener` until `shutdown` is cancelled.
///
/// Every accepted stream gets its own [`ConnectionPipe`] task, tracked by
/// `tracker` so shutdown can wait for in-flight pipes. Accept failures are
/// logged and retried after an exponentially growing delay.
pub(in crate::proxy) async fn accept_loop<L, C>(
    listener: Arc<L>,
    connector: Arc<C>,
    options: AcceptLoopOptions,
) where
    L: AcceptListener + 'static,
    C: Connector,
{
    let backoff = options.backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next) = accept_iteration(&listener, &connector, &options, &backoff, delay).await
    {
        delay = next;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L, C>(
    listener: &Arc<L>,
    connector: &Arc<C>,
    options: &AcceptLoopOptions,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
    C: Connector,
{
    select! {
        biased;

        () = options.shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, peer_addr)) => {
                spawn_pipe_task(
                    stream,
                    Some(peer_addr),
                    Arc::clone(connector),
                    options.connect_timeout,
                    &options.tracker,
                );
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                sleep(delay).await;
                backoff.next_delay(delay)
            }
        }),
    }
}

/// Spawn a task driving one pipe, logging and discarding any panic.
pub(in crate::proxy) fn spawn_pipe_task<S, C>(
    stream: S,
    peer_addr: Option<SocketAddr>,
    connector: Arc<C>,
    connect_timeout: Option<Duration>,
    tracker: &TaskTracker,
) where
    S: ProxyStream,
    C: Connector,
{
    let pipe = ConnectionPipe::new(stream, connector)
        .peer_addr(peer_addr)
        .connect_timeout(connect_timeout);
    let id = pipe.id();
    tracker.spawn(async move {
        match AssertUnwindSafe(pipe.run()).catch_unwind().await {
            Ok(Ok(report)) => tracing::debug!(pipe = id, ?report, "pipe task finished"),
            Ok(Err(err)) => tracing::debug!(pipe = id, error = %err, "pipe task failed"),
            Err(panic) => {
                metrics::inc_pipe_panics();
                let panic_msg = format_panic(panic);
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("pipe task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
                tracing::error!(pipe = id, panic = %panic_msg, ?peer_addr, "pipe task panicked");
            }
        }
    });
}
