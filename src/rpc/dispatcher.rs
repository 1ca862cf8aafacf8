//! Multiplexing dispatcher pairing responses with callers by correlation id.
//!
//! One actor task owns the read half of the transport and the map of pending
//! calls. Callers on any thread reach it through a [`DispatcherHandle`], which
//! forwards commands over an unbounded channel and hands back a
//! [`PendingResponse`] future per call. Encoded requests go to a separate
//! writer task, so responses keep being read while a write is blocked.

use std::{
    collections::HashMap,
    future::Future,
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll, ready},
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf},
    select,
    sync::{mpsc, oneshot},
    task::{JoinError, JoinHandle},
};
use tokio_util::codec::{BytesCodec, Encoder, FramedRead, FramedWrite};

use super::message::{RequestEncoder, RpcCodecError, RpcRequest, RpcResponse, correlation_id};
use crate::{
    codec::{DecodeError, DecodeResult, LengthFieldDecoder, RecoveryPolicy},
    config::RpcClientConfig,
    metrics,
    proxy::Connector,
};

/// Errors resolving an RPC call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher closed before the call completed.
    #[error("dispatcher closed")]
    ChannelClosed,

    /// Another call with this correlation id is still pending.
    #[error("correlation id {0} is already pending")]
    DuplicateId(u64),

    /// No response arrived within the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[source] RpcCodecError),

    /// The response frame for this call carried an invalid header.
    #[error("malformed response for call {id}: {source}")]
    MalformedResponse {
        /// Correlation id read from the frame.
        id: u64,
        /// Header validation failure.
        #[source]
        source: RpcCodecError,
    },
}

type Reply = oneshot::Sender<Result<RpcResponse, DispatchError>>;

enum Command {
    Call {
        id: u64,
        token: u64,
        request: RpcRequest,
        reply: Reply,
    },
    Cancel {
        id: u64,
        token: u64,
    },
    PendingCount(oneshot::Sender<usize>),
    Close,
}

struct PendingCall {
    token: u64,
    reply: Reply,
    created_at: Instant,
}

/// Why the actor task stopped.
#[derive(Clone, Copy, Debug)]
enum CloseReason {
    Requested,
    HandlesDropped,
    PeerClosed,
    Transport,
    Malformed,
}

impl CloseReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::HandlesDropped => "handles dropped",
            Self::PeerClosed => "peer closed",
            Self::Transport => "transport error",
            Self::Malformed => "malformed frame",
        }
    }
}

enum Step {
    Continue,
    Stop(CloseReason),
}

enum Event {
    Command(Option<Command>),
    Frame(Option<Result<DecodeResult, io::Error>>),
    WriterStopped(Result<io::Result<()>, JoinError>),
}

static NEXT_CALL_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Cloneable handle to a dispatcher task.
///
/// # Examples
///
/// ```no_run
/// use wireproxy::{
///     config::RpcClientConfig,
///     proxy::TcpConnector,
///     rpc::{DispatcherHandle, RpcRequest},
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = TcpConnector::new("127.0.0.1", 20880);
/// let dispatcher = DispatcherHandle::connect(&connector, RpcClientConfig::default()).await?;
/// let response = dispatcher
///     .send(RpcRequest::new("com.example.HelloService", "hash").parameter("123456"))
///     .await?;
/// println!("{:?}", response.payload());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl DispatcherHandle {
    /// Spawn a dispatcher task driving `io`.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<T>(io: T, config: RpcClientConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (commands, receiver) = mpsc::unbounded_channel();
        let (outbound, queued) = mpsc::unbounded_channel();
        let task = DispatcherTask {
            frames: FramedRead::new(reader, LengthFieldDecoder::new(config.frame())),
            encoder: RequestEncoder,
            outbound,
            writer: tokio::spawn(write_frames(FramedWrite::new(writer, BytesCodec::new()), queued)),
            commands: receiver,
            pending: HashMap::new(),
            recovery: config.recovery(),
        };
        tokio::spawn(task.run());
        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Dial through `connector` and spawn a dispatcher on the new stream.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the dial fails.
    pub async fn connect<C: Connector>(connector: &C, config: RpcClientConfig) -> io::Result<Self> {
        let stream = connector.connect().await?;
        tracing::debug!(target = %connector.target(), "rpc transport connected");
        Ok(Self::spawn(stream, config))
    }

    /// Issue `request`, assigning a correlation id when it has none.
    ///
    /// Never blocks. The returned future resolves with the matching response
    /// or an error; dropping it cancels the call.
    pub fn send(&self, request: RpcRequest) -> PendingResponse {
        let id = request
            .id()
            .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = NEXT_CALL_TOKEN.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        // A closed actor drops the command and with it `reply`.
        let _ = self.commands.send(Command::Call {
            id,
            token,
            request: request.with_id(id),
            reply,
        });
        PendingResponse {
            id,
            token,
            rx,
            commands: self.commands.clone(),
            settled: false,
        }
    }

    /// Close the dispatcher, failing every pending call with
    /// [`DispatchError::ChannelClosed`].
    pub fn close(&self) { let _ = self.commands.send(Command::Close); }

    /// Returns `true` once the dispatcher task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.commands.is_closed() }

    /// Wait until the dispatcher task has stopped.
    pub async fn closed(&self) { self.commands.closed().await; }

    /// Number of calls awaiting a response.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ChannelClosed`] if the dispatcher has stopped.
    pub async fn pending_count(&self) -> Result<usize, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::PendingCount(tx))
            .map_err(|_| DispatchError::ChannelClosed)?;
        rx.await.map_err(|_| DispatchError::ChannelClosed)
    }
}

/// Deferred result of one call.
///
/// Resolves exactly once. Dropping it before resolution, or calling
/// [`PendingResponse::cancel`], removes the call from the dispatcher; a
/// response arriving afterwards is dropped.
#[must_use = "dropping a PendingResponse cancels the call"]
pub struct PendingResponse {
    id: u64,
    token: u64,
    rx: oneshot::Receiver<Result<RpcResponse, DispatchError>>,
    commands: mpsc::UnboundedSender<Command>,
    settled: bool,
}

impl PendingResponse {
    /// Correlation id of the call.
    #[must_use]
    pub const fn id(&self) -> u64 { self.id }

    /// Abandon the call.
    pub fn cancel(self) { drop(self); }
}

impl Future for PendingResponse {
    type Output = Result<RpcResponse, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.rx).poll(cx));
        self.settled = true;
        Poll::Ready(result.unwrap_or(Err(DispatchError::ChannelClosed)))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.commands.send(Command::Cancel {
                id: self.id,
                token: self.token,
            });
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

struct DispatcherTask<T> {
    frames: FramedRead<ReadHalf<T>, LengthFieldDecoder>,
    encoder: RequestEncoder,
    outbound: mpsc::UnboundedSender<Bytes>,
    writer: JoinHandle<io::Result<()>>,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: HashMap<u64, PendingCall>,
    recovery: RecoveryPolicy,
}

impl<T> DispatcherTask<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn run(mut self) {
        let reason = loop {
            let event = select! {
                biased;
                command = self.commands.recv() => Event::Command(command),
                frame = self.frames.next() => Event::Frame(frame),
                stopped = &mut self.writer => Event::WriterStopped(stopped),
            };
            let step = match event {
                Event::Command(Some(command)) => self.handle_command(command),
                Event::Command(None) => Step::Stop(CloseReason::HandlesDropped),
                Event::Frame(frame) => self.handle_frame(frame),
                Event::WriterStopped(stopped) => {
                    match stopped {
                        Ok(Ok(())) => tracing::debug!("request writer finished"),
                        Ok(Err(error)) => tracing::error!(%error, "failed to write request"),
                        Err(error) => tracing::error!(%error, "request writer task failed"),
                    }
                    Step::Stop(CloseReason::Transport)
                }
            };
            if let Step::Stop(reason) = step {
                break reason;
            }
        };
        self.shutdown(reason);
    }

    fn handle_command(&mut self, command: Command) -> Step {
        match command {
            Command::Call {
                id,
                token,
                request,
                reply,
            } => self.start_call(id, token, request, reply),
            Command::Cancel { id, token } => {
                self.cancel(id, token);
                Step::Continue
            }
            Command::PendingCount(tx) => {
                let _ = tx.send(self.pending.len());
                Step::Continue
            }
            Command::Close => Step::Stop(CloseReason::Requested),
        }
    }

    fn start_call(&mut self, id: u64, token: u64, request: RpcRequest, reply: Reply) -> Step {
        if self.pending.contains_key(&id) {
            tracing::warn!(id, "rejecting call whose correlation id is already pending");
            let _ = reply.send(Err(DispatchError::DuplicateId(id)));
            return Step::Continue;
        }
        if reply.is_closed() {
            return Step::Continue;
        }
        let mut frame = BytesMut::new();
        if let Err(error) = self.encoder.encode(request, &mut frame) {
            tracing::warn!(id, %error, "failed to encode request");
            let _ = reply.send(Err(DispatchError::Encode(error)));
            return Step::Continue;
        }
        self.pending.insert(
            id,
            PendingCall {
                token,
                reply,
                created_at: Instant::now(),
            },
        );
        metrics::set_pending_calls(self.pending.len());
        if self.outbound.send(frame.freeze()).is_err() {
            tracing::error!(id, "request writer is gone");
            return Step::Stop(CloseReason::Transport);
        }
        Step::Continue
    }

    fn cancel(&mut self, id: u64, token: u64) {
        if self.pending.get(&id).is_some_and(|call| call.token == token) {
            self.remove(id);
            tracing::debug!(id, "call cancelled");
        }
    }

    fn handle_frame(&mut self, frame: Option<Result<DecodeResult, io::Error>>) -> Step {
        match frame {
            None => Step::Stop(CloseReason::PeerClosed),
            Some(Err(error)) => {
                tracing::warn!(%error, "rpc transport failed");
                Step::Stop(CloseReason::Transport)
            }
            Some(Ok(Err(error))) => self.handle_decode_error(&error),
            Some(Ok(Ok(frame))) => {
                self.resolve(frame);
                Step::Continue
            }
        }
    }

    fn handle_decode_error(&self, error: &DecodeError) -> Step {
        metrics::inc_decode_errors(error.error_type());
        tracing::warn!(%error, policy = self.recovery.as_str(), "malformed response frame");
        match self.recovery {
            RecoveryPolicy::Drop => Step::Continue,
            RecoveryPolicy::Disconnect => Step::Stop(CloseReason::Malformed),
        }
    }

    fn resolve(&mut self, frame: Bytes) {
        let Some(id) = correlation_id(&frame) else {
            tracing::warn!(len = frame.len(), "dropping response without a correlation id");
            return;
        };
        let Some(call) = self.remove(id) else {
            metrics::inc_unmatched_responses();
            tracing::warn!(id, "dropping response with no pending call");
            return;
        };
        let result =
            RpcResponse::decode(frame).map_err(|source| DispatchError::MalformedResponse { id, source });
        tracing::debug!(id, elapsed = ?call.created_at.elapsed(), "call resolved");
        if call.reply.send(result).is_err() {
            tracing::debug!(id, "caller went away before its response arrived");
        }
    }

    fn remove(&mut self, id: u64) -> Option<PendingCall> {
        let call = self.pending.remove(&id);
        metrics::set_pending_calls(self.pending.len());
        call
    }

    fn shutdown(mut self, reason: CloseReason) {
        self.commands.close();
        self.writer.abort();
        let failed = self.pending.len();
        for (_, call) in self.pending.drain() {
            let _ = call.reply.send(Err(DispatchError::ChannelClosed));
        }
        metrics::set_pending_calls(0);
        tracing::info!(reason = reason.as_str(), failed, "dispatcher closed");
    }
}

/// Write queued request frames, flushing once the queue runs dry.
async fn write_frames<W>(
    mut sink: FramedWrite<W, BytesCodec>,
    mut queued: mpsc::UnboundedReceiver<Bytes>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queued.recv().await {
        sink.feed(frame).await?;
        while let Ok(frame) = queued.try_recv() {
            sink.feed(frame).await?;
        }
        SinkExt::<Bytes>::flush(&mut sink).await?;
    }
    SinkExt::<Bytes>::close(&mut sink).await
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
